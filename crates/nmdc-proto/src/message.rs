//! Inbound message classification and per-command positional grammars.
//!
//! A frame is classified into a [`MsgKind`] by its verb, then handlers pull
//! typed chunks out with the `*Args` parsers below. Parsing here is
//! structural only: it extracts chunks and validates shape, never policy.
//! Semantic checks (classes, shares, rights) stay with the protocol engine.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::MessageParseError;

/// Every inbound command the hub understands, plus [`MsgKind::Ping`] for the
/// bare `|` heartbeat and [`MsgKind::Unknown`] for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    Ping,
    Chat,
    Key,
    Supports,
    ValidateNick,
    MyPass,
    Version,
    GetNickList,
    MyHubUrl,
    MyInfo,
    ExtJson,
    In,
    GetInfo,
    To,
    McTo,
    ConnectToMe,
    MultiConnectToMe,
    RevConnectToMe,
    Search,
    SearchPassive,
    MultiSearch,
    MultiSearchPassive,
    Sa,
    Sp,
    Sr,
    BotInfo,
    Quit,
    MyIp,
    MyNick,
    Lock,
    UserIp,
    Kick,
    OpForceMove,
    Ban,
    TempBan,
    UnBan,
    GetBanList,
    WhoIp,
    GetTopic,
    SetTopic,
    Unknown,
}

impl MsgKind {
    /// Classify a decoded frame.
    pub fn of(frame: &str) -> MsgKind {
        if frame.is_empty() {
            return MsgKind::Ping;
        }

        if frame.starts_with('<') {
            return MsgKind::Chat;
        }

        if !frame.starts_with('$') {
            return MsgKind::Unknown;
        }

        let verb = match frame.find(' ') {
            Some(pos) => &frame[..pos],
            None => frame,
        };

        match verb {
            "$Key" => MsgKind::Key,
            "$Supports" => MsgKind::Supports,
            "$ValidateNick" => MsgKind::ValidateNick,
            "$MyPass" => MsgKind::MyPass,
            "$Version" => MsgKind::Version,
            "$GetNickList" => MsgKind::GetNickList,
            "$MyHubURL" => MsgKind::MyHubUrl,
            "$MyINFO" => MsgKind::MyInfo,
            "$ExtJSON" => MsgKind::ExtJson,
            "$IN" => MsgKind::In,
            "$GetINFO" => MsgKind::GetInfo,
            "$To:" => MsgKind::To,
            "$MCTo:" => MsgKind::McTo,
            "$ConnectToMe" => MsgKind::ConnectToMe,
            "$MultiConnectToMe" => MsgKind::MultiConnectToMe,
            "$RevConnectToMe" => MsgKind::RevConnectToMe,
            "$Search" | "$MultiSearch" => {
                let passive = frame[verb.len()..].trim_start().starts_with("Hub:");

                match (verb, passive) {
                    ("$Search", false) => MsgKind::Search,
                    ("$Search", true) => MsgKind::SearchPassive,
                    (_, false) => MsgKind::MultiSearch,
                    (_, true) => MsgKind::MultiSearchPassive,
                }
            }
            "$SA" => MsgKind::Sa,
            "$SP" => MsgKind::Sp,
            "$SR" => MsgKind::Sr,
            "$BotINFO" => MsgKind::BotInfo,
            "$Quit" => MsgKind::Quit,
            "$MyIP" => MsgKind::MyIp,
            "$MyNick" => MsgKind::MyNick,
            "$Lock" => MsgKind::Lock,
            "$UserIP" => MsgKind::UserIp,
            "$Kick" => MsgKind::Kick,
            "$OpForceMove" => MsgKind::OpForceMove,
            "$Ban" => MsgKind::Ban,
            "$TempBan" => MsgKind::TempBan,
            "$UnBan" => MsgKind::UnBan,
            "$GetBanList" => MsgKind::GetBanList,
            "$WhoIP" => MsgKind::WhoIp,
            "$GetTopic" => MsgKind::GetTopic,
            "$SetTopic" => MsgKind::SetTopic,
            _ => MsgKind::Unknown,
        }
    }

    /// Display name used in flood reports and close messages.
    pub fn name(&self) -> &'static str {
        match self {
            MsgKind::Ping => "Ping",
            MsgKind::Chat => "Chat",
            MsgKind::Key => "Key",
            MsgKind::Supports => "Supports",
            MsgKind::ValidateNick => "ValidateNick",
            MsgKind::MyPass => "MyPass",
            MsgKind::Version => "Version",
            MsgKind::GetNickList => "GetNickList",
            MsgKind::MyHubUrl => "MyHubURL",
            MsgKind::MyInfo => "MyINFO",
            MsgKind::ExtJson => "ExtJSON",
            MsgKind::In => "IN",
            MsgKind::GetInfo => "GetINFO",
            MsgKind::To => "To",
            MsgKind::McTo => "MCTo",
            MsgKind::ConnectToMe => "ConnectToMe",
            MsgKind::MultiConnectToMe => "MultiConnectToMe",
            MsgKind::RevConnectToMe => "RevConnectToMe",
            MsgKind::Search => "Search",
            MsgKind::SearchPassive => "Search",
            MsgKind::MultiSearch => "MultiSearch",
            MsgKind::MultiSearchPassive => "MultiSearch",
            MsgKind::Sa => "SA",
            MsgKind::Sp => "SP",
            MsgKind::Sr => "SR",
            MsgKind::BotInfo => "BotINFO",
            MsgKind::Quit => "Quit",
            MsgKind::MyIp => "MyIP",
            MsgKind::MyNick => "MyNick",
            MsgKind::Lock => "Lock",
            MsgKind::UserIp => "UserIP",
            MsgKind::Kick => "Kick",
            MsgKind::OpForceMove => "OpForceMove",
            MsgKind::Ban => "Ban",
            MsgKind::TempBan => "TempBan",
            MsgKind::UnBan => "UnBan",
            MsgKind::GetBanList => "GetBanList",
            MsgKind::WhoIp => "WhoIP",
            MsgKind::GetTopic => "GetTopic",
            MsgKind::SetTopic => "SetTopic",
            MsgKind::Unknown => "Unknown",
        }
    }
}

/// A classified frame. The raw text is kept because several commands are
/// forwarded verbatim and flood hashing works on the full frame.
#[derive(Debug, Clone)]
pub struct Message {
    /// Command kind derived from the verb.
    pub kind: MsgKind,
    /// Decoded frame without the pipe terminator.
    pub raw: String,
}

impl Message {
    /// Classify a decoded frame.
    pub fn new(raw: String) -> Message {
        let kind = MsgKind::of(&raw);
        Message { kind, raw }
    }

    /// The chunk text after `<verb> `, empty when the frame is bare.
    pub fn payload(&self) -> &str {
        match self.raw.find(' ') {
            Some(pos) => &self.raw[pos + 1..],
            None => "",
        }
    }
}

fn grammar_err(command: &'static str) -> MessageParseError {
    MessageParseError::GrammarMismatch { command }
}

// ============================================================================
// MyINFO
// ============================================================================

lazy_static! {
    static ref RE_MYINFO: Regex =
        Regex::new(r"^\$MyINFO \$ALL ([^ $|]+) ([^$|]*)\$ \$([^$|]*)\$([^$|]*)\$([0-9]*)\$?$")
            .unwrap();
    static ref RE_TO: Regex = Regex::new(r"^\$To: ([^ $|]+) From: ([^ $|]+) \$<([^>]*)> ((?s).*)$").unwrap();
    static ref RE_MCTO: Regex = Regex::new(r"^\$MCTo: ([^ $|]+) \$([^ $|]+) ((?s).*)$").unwrap();
    static ref RE_CHAT: Regex = Regex::new(r"^<([^>]+)> ((?s).*)$").unwrap();
    static ref RE_CTM: Regex = Regex::new(r"^\$(?:Multi)?ConnectToMe ([^ $|]+) ([^ :$|]+):((?s).+)$").unwrap();
    static ref RE_RCTM: Regex = Regex::new(r"^\$RevConnectToMe ([^ $|]+) ([^ $|]+)$").unwrap();
    static ref RE_SA: Regex = Regex::new(r"^\$SA ([A-Z0-9]{39}) ([^ :$|]+):([0-9]{1,5})$").unwrap();
    static ref RE_SP: Regex = Regex::new(r"^\$SP ([A-Z0-9]{39}) ([^ $|]+)$").unwrap();
    static ref RE_OPFORCEMOVE: Regex =
        Regex::new(r"^\$OpForceMove \$Who:([^ $|]+)\$Where:([^$|]+)\$Msg:((?s).*)$").unwrap();
    static ref RE_GETINFO: Regex = Regex::new(r"^\$GetINFO ([^ $|]+) ([^ $|]+)$").unwrap();
    static ref RE_EXTJSON: Regex = Regex::new(r"^\$ExtJSON ([^ $|]+) ((?s).+)$").unwrap();
}

/// Chunks of `$MyINFO $ALL <nick> <desc>$ $<speed+status>$<email>$<share>$`.
#[derive(Debug, Clone, PartialEq)]
pub struct MyInfoArgs {
    pub nick: String,
    pub desc: String,
    /// Connection speed with the trailing status byte.
    pub speed: String,
    pub email: String,
    /// Share size chunk as sent; may be empty.
    pub share: String,
}

impl MyInfoArgs {
    pub fn parse(raw: &str) -> Result<MyInfoArgs, MessageParseError> {
        let caps = RE_MYINFO.captures(raw).ok_or_else(|| grammar_err("MyINFO"))?;

        Ok(MyInfoArgs {
            nick: caps[1].to_string(),
            desc: caps[2].to_string(),
            speed: caps[3].to_string(),
            email: caps[4].to_string(),
            share: caps[5].to_string(),
        })
    }

    /// Status byte carried at the end of the speed chunk.
    pub fn status_byte(&self) -> u8 {
        self.speed.as_bytes().last().copied().unwrap_or(1)
    }

    /// Share in bytes with the legacy guard: oversized or non-numeric
    /// chunks count as zero.
    pub fn share_bytes(&self) -> u64 {
        if self.share.len() > 18 {
            return 0;
        }

        self.share.parse().unwrap_or(0)
    }

    /// Rebuild the wire form from the chunks.
    pub fn to_frame(&self) -> String {
        format!(
            "$MyINFO $ALL {} {}$ ${}${}${}$",
            self.nick, self.desc, self.speed, self.email, self.share
        )
    }
}

// ============================================================================
// Chat, To, MCTo
// ============================================================================

/// Chunks of a main-chat frame `<nick> text`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatArgs {
    pub nick: String,
    pub text: String,
}

impl ChatArgs {
    pub fn parse(raw: &str) -> Result<ChatArgs, MessageParseError> {
        let caps = RE_CHAT.captures(raw).ok_or_else(|| grammar_err("Chat"))?;

        Ok(ChatArgs {
            nick: caps[1].to_string(),
            text: caps[2].to_string(),
        })
    }
}

/// Chunks of `$To: <to> From: <from> $<<sign>> <text>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToArgs {
    pub to: String,
    pub from: String,
    /// Nick inside the message signature; must match `from`.
    pub sign: String,
    pub text: String,
}

impl ToArgs {
    pub fn parse(raw: &str) -> Result<ToArgs, MessageParseError> {
        let caps = RE_TO.captures(raw).ok_or_else(|| grammar_err("To"))?;

        Ok(ToArgs {
            to: caps[1].to_string(),
            from: caps[2].to_string(),
            sign: caps[3].to_string(),
            text: caps[4].to_string(),
        })
    }
}

/// Chunks of `$MCTo: <to> $<from> <text>`.
#[derive(Debug, Clone, PartialEq)]
pub struct McToArgs {
    pub to: String,
    pub from: String,
    pub text: String,
}

impl McToArgs {
    pub fn parse(raw: &str) -> Result<McToArgs, MessageParseError> {
        let caps = RE_MCTO.captures(raw).ok_or_else(|| grammar_err("MCTo"))?;

        Ok(McToArgs {
            to: caps[1].to_string(),
            from: caps[2].to_string(),
            text: caps[3].to_string(),
        })
    }
}

// ============================================================================
// ConnectToMe / RevConnectToMe
// ============================================================================

/// Suffix flags a `$ConnectToMe` port may carry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CtmFlags {
    /// `S` - the sender wants a TLS connection.
    pub tls: bool,
    /// `R` - NAT reversal request.
    pub nat: bool,
    /// Secondary nick from the `N <nick>` / `NS <nick>` forms.
    pub nat_nick: Option<String>,
}

/// Chunks of `$ConnectToMe <nick> <ip>:<port>[flags][ <natnick>]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CtmArgs {
    /// Target nick.
    pub nick: String,
    pub ip: String,
    pub port: u16,
    pub flags: CtmFlags,
}

impl CtmArgs {
    pub fn parse(raw: &str) -> Result<CtmArgs, MessageParseError> {
        let caps = RE_CTM.captures(raw).ok_or_else(|| grammar_err("ConnectToMe"))?;
        let nick = caps[1].to_string();
        let ip = caps[2].to_string();
        let port_chunk = &caps[3];

        let mut flags = CtmFlags::default();

        let main = match port_chunk.split_once(' ') {
            Some((main, nat_nick)) if !nat_nick.is_empty() => {
                flags.nat_nick = Some(nat_nick.to_string());
                main
            }
            Some((main, _)) => main,
            None => port_chunk,
        };

        let digits = if let Some(main) = main.strip_suffix("NS") {
            flags.nat = true;
            flags.tls = true;
            main
        } else if let Some(main) = main.strip_suffix("RS") {
            flags.nat = true;
            flags.tls = true;
            main
        } else if let Some(main) = main.strip_suffix('N') {
            flags.nat = true;
            main
        } else if let Some(main) = main.strip_suffix('R') {
            flags.nat = true;
            main
        } else if let Some(main) = main.strip_suffix('S') {
            flags.tls = true;
            main
        } else {
            main
        };

        if digits.is_empty() || digits.len() > 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MessageParseError::InvalidNumber { chunk: "port" });
        }

        let port: u32 = digits
            .parse()
            .map_err(|_| MessageParseError::InvalidNumber { chunk: "port" })?;

        if port == 0 || port > u16::MAX as u32 {
            return Err(MessageParseError::InvalidNumber { chunk: "port" });
        }

        Ok(CtmArgs {
            nick,
            ip,
            port: port as u16,
            flags,
        })
    }
}

/// Chunks of `$RevConnectToMe <from> <to>`.
#[derive(Debug, Clone, PartialEq)]
pub struct RctmArgs {
    pub from: String,
    pub to: String,
}

impl RctmArgs {
    pub fn parse(raw: &str) -> Result<RctmArgs, MessageParseError> {
        let caps = RE_RCTM.captures(raw).ok_or_else(|| grammar_err("RevConnectToMe"))?;

        Ok(RctmArgs {
            from: caps[1].to_string(),
            to: caps[2].to_string(),
        })
    }
}

// ============================================================================
// Search
// ============================================================================

/// Where a search originates and how results are returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOrigin {
    /// `<ip>:<port>` - results go straight to the address.
    Active { ip: String, port: u16 },
    /// `Hub:<nick>` - results are relayed through the hub.
    Passive { nick: String },
}

/// Chunks of the long search form: origin, limits and pattern.
///
/// Limits are the four `?`-separated fields with their trailing `?`, e.g.
/// `F?T?0?9?`; the pattern is everything after.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchArgs {
    pub origin: SearchOrigin,
    pub limits: String,
    pub pattern: String,
}

impl SearchArgs {
    pub fn parse(raw: &str) -> Result<SearchArgs, MessageParseError> {
        let payload = raw
            .strip_prefix("$MultiSearch ")
            .or_else(|| raw.strip_prefix("$Search "))
            .ok_or_else(|| grammar_err("Search"))?;

        let (addr, query) = payload
            .split_once(' ')
            .ok_or_else(|| grammar_err("Search"))?;

        let origin = if let Some(nick) = addr.strip_prefix("Hub:") {
            if nick.is_empty() {
                return Err(grammar_err("Search"));
            }

            SearchOrigin::Passive {
                nick: nick.to_string(),
            }
        } else {
            let (ip, port) = addr
                .split_once(':')
                .ok_or_else(|| MessageParseError::InvalidAddress(addr.to_string()))?;

            let port: u16 = port
                .parse()
                .map_err(|_| MessageParseError::InvalidNumber { chunk: "port" })?;

            if ip.is_empty() || port == 0 {
                return Err(MessageParseError::InvalidAddress(addr.to_string()));
            }

            SearchOrigin::Active {
                ip: ip.to_string(),
                port,
            }
        };

        // Limits are everything up to and including the fourth '?'.
        let mut seen = 0usize;
        let mut split_at = None;

        for (i, b) in query.bytes().enumerate() {
            if b == b'?' {
                seen += 1;

                if seen == 4 {
                    split_at = Some(i + 1);
                    break;
                }
            }
        }

        let split_at = split_at.ok_or_else(|| grammar_err("Search"))?;
        let (limits, pattern) = query.split_at(split_at);

        if limits.len() < 8 {
            return Err(grammar_err("Search"));
        }

        Ok(SearchArgs {
            origin,
            limits: limits.to_string(),
            pattern: pattern.to_string(),
        })
    }

    /// Whether the limits request a TTH lookup (`...?9?`).
    pub fn wants_tth(&self) -> bool {
        self.limits.ends_with("?9?")
    }

    /// The TTH root when the pattern is a well-formed `TTH:<39>` query.
    pub fn tth(&self) -> Option<&str> {
        let root = self.pattern.strip_prefix("TTH:")?;

        if root.len() == crate::TTH_LEN {
            Some(root)
        } else {
            None
        }
    }

    /// Rewrite a malformed TTH request into a byte search, preserving the
    /// legacy behavior for roots that are not exactly 39 characters.
    pub fn rewrite_to_byte_search(&mut self) {
        let len = self.limits.len();
        self.limits.replace_range(len - 2..len - 1, "1");

        if let Some(root) = self.pattern.strip_prefix("TTH:") {
            self.pattern = root.to_string();
        }
    }

    /// Rebuild the long wire form.
    pub fn to_frame(&self) -> String {
        let addr = match &self.origin {
            SearchOrigin::Active { ip, port } => format!("{}:{}", ip, port),
            SearchOrigin::Passive { nick } => format!("Hub:{}", nick),
        };

        format!("$Search {} {}{}", addr, self.limits, self.pattern)
    }
}

/// Chunks of the short active form `$SA <tth> <ip>:<port>`.
#[derive(Debug, Clone, PartialEq)]
pub struct SaArgs {
    pub tth: String,
    pub ip: String,
    pub port: u16,
}

impl SaArgs {
    pub fn parse(raw: &str) -> Result<SaArgs, MessageParseError> {
        let caps = RE_SA.captures(raw).ok_or_else(|| grammar_err("SA"))?;

        let port: u16 = caps[3]
            .parse()
            .map_err(|_| MessageParseError::InvalidNumber { chunk: "port" })?;

        if port == 0 {
            return Err(MessageParseError::InvalidNumber { chunk: "port" });
        }

        Ok(SaArgs {
            tth: caps[1].to_string(),
            ip: caps[2].to_string(),
            port,
        })
    }
}

/// Chunks of the short passive form `$SP <tth> <nick>`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpArgs {
    pub tth: String,
    pub nick: String,
}

impl SpArgs {
    pub fn parse(raw: &str) -> Result<SpArgs, MessageParseError> {
        let caps = RE_SP.captures(raw).ok_or_else(|| grammar_err("SP"))?;

        Ok(SpArgs {
            tth: caps[1].to_string(),
            nick: caps[2].to_string(),
        })
    }
}

// ============================================================================
// SR
// ============================================================================

/// Chunks of a search result. The trailing `\x05<to>` segment is stripped
/// before the result is relayed.
#[derive(Debug, Clone, PartialEq)]
pub struct SrArgs {
    /// Reporting nick.
    pub from: String,
    /// Target nick from the routing suffix.
    pub to: Option<String>,
    /// The frame without the routing suffix, ready to forward.
    pub forward: String,
}

impl SrArgs {
    pub fn parse(raw: &str) -> Result<SrArgs, MessageParseError> {
        let payload = raw.strip_prefix("$SR ").ok_or_else(|| grammar_err("SR"))?;

        let from = payload
            .split(&[' ', '\x05'][..])
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| grammar_err("SR"))?
            .to_string();

        // The routing suffix is the last \x05 segment when it follows the
        // closing parenthesis of the hub address.
        match payload.rfind('\x05') {
            Some(pos) if payload[..pos].ends_with(')') => {
                let to = &payload[pos + 1..];

                if to.is_empty() || to.contains(' ') {
                    return Err(grammar_err("SR"));
                }

                Ok(SrArgs {
                    from,
                    to: Some(to.to_string()),
                    forward: format!("$SR {}", &payload[..pos]),
                })
            }
            _ => Ok(SrArgs {
                from,
                to: None,
                forward: raw.to_string(),
            }),
        }
    }
}

// ============================================================================
// Remaining simple grammars
// ============================================================================

/// Chunks of `$GetINFO <target> <me>`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetInfoArgs {
    pub target: String,
    pub me: String,
}

impl GetInfoArgs {
    pub fn parse(raw: &str) -> Result<GetInfoArgs, MessageParseError> {
        let caps = RE_GETINFO.captures(raw).ok_or_else(|| grammar_err("GetINFO"))?;

        Ok(GetInfoArgs {
            target: caps[1].to_string(),
            me: caps[2].to_string(),
        })
    }
}

/// Chunks of `$ExtJSON <nick> <json>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtJsonArgs {
    pub nick: String,
    pub json: String,
}

impl ExtJsonArgs {
    pub fn parse(raw: &str) -> Result<ExtJsonArgs, MessageParseError> {
        let caps = RE_EXTJSON.captures(raw).ok_or_else(|| grammar_err("ExtJSON"))?;

        Ok(ExtJsonArgs {
            nick: caps[1].to_string(),
            json: caps[2].to_string(),
        })
    }
}

/// Chunks of `$OpForceMove $Who:<nick>$Where:<addr>$Msg:<reason>`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpForceMoveArgs {
    pub who: String,
    pub along: String,
    pub reason: String,
}

impl OpForceMoveArgs {
    pub fn parse(raw: &str) -> Result<OpForceMoveArgs, MessageParseError> {
        let caps = RE_OPFORCEMOVE
            .captures(raw)
            .ok_or_else(|| grammar_err("OpForceMove"))?;

        Ok(OpForceMoveArgs {
            who: caps[1].to_string(),
            along: caps[2].to_string(),
            reason: caps[3].to_string(),
        })
    }
}

/// Chunks of `$TempBan <nick>$<minutes>$<reason>` and `$Ban <nick>$<reason>`.
#[derive(Debug, Clone, PartialEq)]
pub struct BanArgs {
    pub nick: String,
    /// Minutes for `$TempBan`, absent for a plain `$Ban`.
    pub minutes: Option<u64>,
    pub reason: String,
}

impl BanArgs {
    pub fn parse(raw: &str) -> Result<BanArgs, MessageParseError> {
        if let Some(payload) = raw.strip_prefix("$TempBan ") {
            let mut parts = payload.splitn(3, '$');
            let nick = parts.next().unwrap_or_default();
            let minutes = parts
                .next()
                .ok_or_else(|| grammar_err("TempBan"))?
                .parse()
                .map_err(|_| MessageParseError::InvalidNumber { chunk: "minutes" })?;
            let reason = parts.next().unwrap_or_default();

            if nick.is_empty() {
                return Err(grammar_err("TempBan"));
            }

            Ok(BanArgs {
                nick: nick.to_string(),
                minutes: Some(minutes),
                reason: reason.to_string(),
            })
        } else if let Some(payload) = raw.strip_prefix("$Ban ") {
            let (nick, reason) = payload.split_once('$').unwrap_or((payload, ""));

            if nick.is_empty() {
                return Err(grammar_err("Ban"));
            }

            Ok(BanArgs {
                nick: nick.to_string(),
                minutes: None,
                reason: reason.to_string(),
            })
        } else {
            Err(grammar_err("Ban"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_core_commands() {
        assert_eq!(MsgKind::of(""), MsgKind::Ping);
        assert_eq!(MsgKind::of("<alice> hi"), MsgKind::Chat);
        assert_eq!(MsgKind::of("$Key abc"), MsgKind::Key);
        assert_eq!(MsgKind::of("$Search 1.2.3.4:412 F?T?0?1?x"), MsgKind::Search);
        assert_eq!(MsgKind::of("$Search Hub:me F?T?0?1?x"), MsgKind::SearchPassive);
        assert_eq!(MsgKind::of("$BotINFO pinger"), MsgKind::BotInfo);
        assert_eq!(MsgKind::of("$NoSuchThing"), MsgKind::Unknown);
        assert_eq!(MsgKind::of("plain noise"), MsgKind::Unknown);
    }

    #[test]
    fn myinfo_roundtrip() {
        let raw = "$MyINFO $ALL alice desc <++ V:1,M:A,H:0/0/1,S:2>$ $100\u{1}$mail@x$10737418240$";
        let args = MyInfoArgs::parse(raw).unwrap();
        assert_eq!(args.nick, "alice");
        assert_eq!(args.desc, "desc <++ V:1,M:A,H:0/0/1,S:2>");
        assert_eq!(args.email, "mail@x");
        assert_eq!(args.share_bytes(), 10_737_418_240);
        assert_eq!(args.status_byte(), 1);
        assert_eq!(args.to_frame(), raw);
    }

    #[test]
    fn myinfo_oversized_share_is_zero() {
        let raw = "$MyINFO $ALL bob x$ $1\u{1}$$9999999999999999999$";
        let args = MyInfoArgs::parse(raw).unwrap();
        assert_eq!(args.share_bytes(), 0);
    }

    #[test]
    fn to_grammar() {
        let raw = "$To: bob From: alice $<alice> hello there";
        let args = ToArgs::parse(raw).unwrap();
        assert_eq!(args.to, "bob");
        assert_eq!(args.from, "alice");
        assert_eq!(args.sign, "alice");
        assert_eq!(args.text, "hello there");
    }

    #[test]
    fn mcto_grammar() {
        let args = McToArgs::parse("$MCTo: bob $alice psst").unwrap();
        assert_eq!((args.to.as_str(), args.from.as_str(), args.text.as_str()), ("bob", "alice", "psst"));
    }

    #[test]
    fn ctm_flag_suffixes() {
        let plain = CtmArgs::parse("$ConnectToMe bob 10.0.0.1:412").unwrap();
        assert_eq!(plain.port, 412);
        assert_eq!(plain.flags, CtmFlags::default());

        let tls = CtmArgs::parse("$ConnectToMe bob 10.0.0.1:412S").unwrap();
        assert!(tls.flags.tls && !tls.flags.nat);

        let nat = CtmArgs::parse("$ConnectToMe bob 10.0.0.1:412R").unwrap();
        assert!(nat.flags.nat && !nat.flags.tls);

        let both = CtmArgs::parse("$ConnectToMe bob 10.0.0.1:412RS").unwrap();
        assert!(both.flags.nat && both.flags.tls);

        let natnick = CtmArgs::parse("$ConnectToMe bob 10.0.0.1:412NS carol").unwrap();
        assert!(natnick.flags.nat && natnick.flags.tls);
        assert_eq!(natnick.flags.nat_nick.as_deref(), Some("carol"));
    }

    #[test]
    fn ctm_rejects_bad_ports() {
        assert!(CtmArgs::parse("$ConnectToMe bob 10.0.0.1:0").is_err());
        assert!(CtmArgs::parse("$ConnectToMe bob 10.0.0.1:123456").is_err());
        assert!(CtmArgs::parse("$ConnectToMe bob 10.0.0.1:4x2").is_err());
    }

    #[test]
    fn search_active_and_passive() {
        let active = SearchArgs::parse("$Search 1.2.3.4:412 F?T?0?1?ubuntu iso").unwrap();
        assert_eq!(
            active.origin,
            SearchOrigin::Active {
                ip: "1.2.3.4".into(),
                port: 412
            }
        );
        assert_eq!(active.limits, "F?T?0?1?");
        assert_eq!(active.pattern, "ubuntu iso");
        assert!(!active.wants_tth());

        let passive = SearchArgs::parse("$Search Hub:carol T?F?1024?2?doc").unwrap();
        assert_eq!(
            passive.origin,
            SearchOrigin::Passive {
                nick: "carol".into()
            }
        );
    }

    #[test]
    fn search_tth_detection_and_rewrite() {
        let tth_root = "A".repeat(39);
        let raw = format!("$Search Hub:me F?T?0?9?TTH:{}", tth_root);
        let args = SearchArgs::parse(&raw).unwrap();
        assert!(args.wants_tth());
        assert_eq!(args.tth(), Some(tth_root.as_str()));

        let mut short = SearchArgs::parse("$Search Hub:me F?T?0?9?TTH:TOOSHORT").unwrap();
        assert!(short.wants_tth());
        assert_eq!(short.tth(), None);
        short.rewrite_to_byte_search();
        assert_eq!(short.limits, "F?T?0?1?");
        assert_eq!(short.pattern, "TOOSHORT");
        assert!(!short.wants_tth());
    }

    #[test]
    fn sa_sp_grammars() {
        let tth = "B".repeat(39);
        let sa = SaArgs::parse(&format!("$SA {} 1.2.3.4:412", tth)).unwrap();
        assert_eq!(sa.tth, tth);
        assert_eq!(sa.port, 412);

        let sp = SpArgs::parse(&format!("$SP {} dave", tth)).unwrap();
        assert_eq!(sp.nick, "dave");

        assert!(SaArgs::parse("$SA SHORT 1.2.3.4:412").is_err());
    }

    #[test]
    fn sr_strips_routing_suffix() {
        let raw = "$SR alice path\\file.bin\x05123 2/4\x05TheHub (1.2.3.4:411)\x05bob";
        let args = SrArgs::parse(raw).unwrap();
        assert_eq!(args.from, "alice");
        assert_eq!(args.to.as_deref(), Some("bob"));
        assert_eq!(
            args.forward,
            "$SR alice path\\file.bin\x05123 2/4\x05TheHub (1.2.3.4:411)"
        );
    }

    #[test]
    fn opforcemove_grammar() {
        let args =
            OpForceMoveArgs::parse("$OpForceMove $Who:bob$Where:other.hub:411$Msg:go away").unwrap();
        assert_eq!(args.who, "bob");
        assert_eq!(args.along, "other.hub:411");
        assert_eq!(args.reason, "go away");
    }

    #[test]
    fn ban_grammars() {
        let ban = BanArgs::parse("$Ban bob$being rude").unwrap();
        assert_eq!(ban.minutes, None);
        assert_eq!(ban.reason, "being rude");

        let tban = BanArgs::parse("$TempBan bob$30$cool off").unwrap();
        assert_eq!(tban.minutes, Some(30));
        assert_eq!(tban.reason, "cool off");
    }
}
