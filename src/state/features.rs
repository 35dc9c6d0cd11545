//! Negotiated feature bits.
//!
//! Each `$Supports` token the hub recognizes maps to one bit on the
//! connection. Legacy tokens are parsed and stored but never echoed or
//! acted on.

pub const OPPLUS: u32 = 1 << 0;
pub const NOHELLO: u32 = 1 << 1;
pub const NOGETINFO: u32 = 1 << 2;
pub const DHT0: u32 = 1 << 3;
pub const QUICKLIST: u32 = 1 << 4;
pub const BOTINFO: u32 = 1 << 5;
pub const ZLIB: u32 = 1 << 6;
pub const CHATONLY: u32 = 1 << 7;
pub const MCTO: u32 = 1 << 8;
pub const USERCOMMAND: u32 = 1 << 9;
pub const BOTLIST: u32 = 1 << 10;
pub const HUBTOPIC: u32 = 1 << 11;
pub const USERIP2: u32 = 1 << 12;
pub const TTHSEARCH: u32 = 1 << 13;
pub const FEED: u32 = 1 << 14;
pub const TTHS: u32 = 1 << 15;
pub const IN: u32 = 1 << 16;
pub const BANMSG: u32 = 1 << 17;
pub const TLS: u32 = 1 << 18;
pub const FAILOVER: u32 = 1 << 19;
pub const NICKCHANGE: u32 = 1 << 20;
pub const CLIENTNICK: u32 = 1 << 21;
pub const ZLINE: u32 = 1 << 22;
pub const GETZBLOCK: u32 = 1 << 23;
pub const ACTM: u32 = 1 << 24;
pub const SALTPASS: u32 = 1 << 25;
pub const NICKRULE: u32 = 1 << 26;
pub const SEARCHRULE: u32 = 1 << 27;
pub const HUBURL: u32 = 1 << 28;
pub const EXTJSON2: u32 = 1 << 29;

/// Parse a client `$Supports` token list.
///
/// Returns the feature bitmask and the token list the hub echoes back.
/// The echo only names features the hub acts on; `BotINFO` is answered
/// with `HubINFO`, matching what pingers expect.
pub fn parse_supports(tokens: &str, extjson_disabled: bool) -> (u32, String) {
    let mut features = 0u32;
    let mut echo = String::new();

    let mut push = |echo: &mut String, token: &str| {
        echo.push_str(token);
        echo.push(' ');
    };

    for token in tokens.split_ascii_whitespace() {
        match token {
            "OpPlus" => {
                features |= OPPLUS;
                push(&mut echo, "OpPlus");
            }
            "NoHello" => {
                features |= NOHELLO;
                push(&mut echo, "NoHello");
            }
            "NoGetINFO" => {
                features |= NOGETINFO;
                push(&mut echo, "NoGetINFO");
            }
            "DHT0" => features |= DHT0,
            "QuickList" => features |= QUICKLIST,
            "BotINFO" => {
                features |= BOTINFO;
                push(&mut echo, "HubINFO");
            }
            "ZPipe0" | "ZPipe" => {
                features |= ZLIB;
                push(&mut echo, "ZPipe0");
            }
            "ChatOnly" => {
                features |= CHATONLY;
                push(&mut echo, "ChatOnly");
            }
            "MCTo" => {
                features |= MCTO;
                push(&mut echo, "MCTo");
            }
            "UserCommand" => features |= USERCOMMAND,
            "BotList" => {
                features |= BOTLIST;
                push(&mut echo, "BotList");
            }
            "HubTopic" => {
                features |= HUBTOPIC;
                push(&mut echo, "HubTopic");
            }
            "UserIP2" => {
                features |= USERIP2;
                push(&mut echo, "UserIP2");
            }
            "TTHSearch" => {
                features |= TTHSEARCH;
                push(&mut echo, "TTHSearch");
            }
            "Feed" => features |= FEED,
            "TTHS" => {
                features |= TTHS;
                push(&mut echo, "TTHS");
            }
            "IN" => features |= IN,
            "BanMsg" => features |= BANMSG,
            "TLS" => {
                features |= TLS;
                push(&mut echo, "TLS");
            }
            "FailOver" => {
                features |= FAILOVER;
                push(&mut echo, "FailOver");
            }
            "NickChange" => features |= NICKCHANGE,
            "ClientNick" => features |= CLIENTNICK,
            "ZLine" => features |= ZLINE,
            "GetZBlock" => features |= GETZBLOCK,
            "ACTM" => features |= ACTM,
            "SaltPass" => features |= SALTPASS,
            "NickRule" => {
                features |= NICKRULE;
                push(&mut echo, "NickRule");
            }
            "SearchRule" => {
                features |= SEARCHRULE;
                push(&mut echo, "SearchRule");
            }
            "HubURL" => {
                features |= HUBURL;
                push(&mut echo, "HubURL");
            }
            "ExtJSON2" => {
                features |= EXTJSON2;

                if !extjson_disabled {
                    push(&mut echo, "ExtJSON2");
                }
            }
            _ => {}
        }
    }

    (features, echo.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_echoes_known_tokens() {
        let (features, echo) = parse_supports("NoHello NoGetINFO TTHS UserIP2", false);
        assert_ne!(features & NOHELLO, 0);
        assert_ne!(features & TTHS, 0);
        assert_eq!(echo, "NoHello NoGetINFO TTHS UserIP2");
    }

    #[test]
    fn botinfo_is_answered_with_hubinfo() {
        let (features, echo) = parse_supports("BotINFO", false);
        assert_ne!(features & BOTINFO, 0);
        assert_eq!(echo, "HubINFO");
    }

    #[test]
    fn legacy_tokens_are_silent() {
        let (features, echo) = parse_supports("DHT0 ACTM ZLine GetZBlock SaltPass", false);
        assert_ne!(features & DHT0, 0);
        assert_ne!(features & ACTM, 0);
        assert!(echo.is_empty());
    }

    #[test]
    fn zpipe_aliases_collapse() {
        let (features, echo) = parse_supports("ZPipe", false);
        assert_ne!(features & ZLIB, 0);
        assert_eq!(echo, "ZPipe0");
    }

    #[test]
    fn extjson_echo_respects_disable() {
        let (_, echo) = parse_supports("ExtJSON2", true);
        assert!(echo.is_empty());
        let (_, echo) = parse_supports("ExtJSON2", false);
        assert_eq!(echo, "ExtJSON2");
    }
}
