//! Outbound frame builders.
//!
//! One function per hub-emitted command, returning the frame without its
//! pipe terminator; the writer appends that. Field escaping is the caller's
//! job, since several frames relay already-escaped client text verbatim.

/// `$Lock <lock> Pk=<product> <version>` - first bytes on every connection.
pub fn lock(lock: &str, product: &str, version: &str) -> String {
    format!("$Lock {} Pk={} {}", lock, product, version)
}

/// `$Supports <tokens>` - the hub's answer to the client's feature list.
pub fn supports(tokens: &str) -> String {
    format!("$Supports {}", tokens.trim_end())
}

/// `$Hello <nick>` - nick accepted without a password round.
pub fn hello(nick: &str) -> String {
    format!("$Hello {}", nick)
}

/// `$GetPass`
pub fn get_pass() -> String {
    "$GetPass".to_string()
}

/// `$BadPass`
pub fn bad_pass() -> String {
    "$BadPass".to_string()
}

/// `$GetHubURL`
pub fn get_hub_url() -> String {
    "$GetHubURL".to_string()
}

/// `$LogedIn <nick>` - the historical spelling is part of the wire protocol.
pub fn loged_in(nick: &str) -> String {
    format!("$LogedIn {}", nick)
}

/// `$ValidateDenide <nick>` - ditto.
pub fn validate_denide(nick: &str) -> String {
    format!("$ValidateDenide {}", nick)
}

/// `$BadNick <id> <par>` - structured nick rejection for NickRule clients.
pub fn bad_nick(id: &str, par: &str) -> String {
    if par.is_empty() {
        format!("$BadNick {}", id)
    } else {
        format!("$BadNick {} {}", id, par)
    }
}

/// `$NickRule <rules>`
pub fn nick_rule(rules: &str) -> String {
    format!("$NickRule {}", rules)
}

/// `$SearchRule <rules>`
pub fn search_rule(rules: &str) -> String {
    format!("$SearchRule {}", rules)
}

/// `$HubName <name>[ - <topic>]`
pub fn hub_name(name: &str, topic: &str) -> String {
    if topic.is_empty() {
        format!("$HubName {}", name)
    } else {
        format!("$HubName {} - {}", name, topic)
    }
}

/// `$HubTopic <topic>`
pub fn hub_topic(topic: &str) -> String {
    format!("$HubTopic {}", topic)
}

/// `$HubIsFull`
pub fn hub_is_full() -> String {
    "$HubIsFull".to_string()
}

/// `$FailOver <host1,host2,...>`
pub fn fail_over(hosts: &str) -> String {
    format!("$FailOver {}", hosts)
}

/// `$ForceMove <address>` - redirect to another hub.
pub fn force_move(addr: &str) -> String {
    format!("$ForceMove {}", addr)
}

/// `$HubINFO <pars>` - the pinger reply, fields joined with `$`.
pub fn hub_info(pars: &str) -> String {
    format!("$HubINFO {}", pars)
}

/// `$SetIcon <url>` - hub icon hint for capable clients.
pub fn set_icon(url: &str) -> String {
    format!("$SetIcon {}", url)
}

/// `$SetLogo <url>`
pub fn set_logo(url: &str) -> String {
    format!("$SetLogo {}", url)
}

/// `<nick> text` - main chat.
pub fn chat(nick: &str, text: &str) -> String {
    format!("<{}> {}", nick, text)
}

/// `** nick text` - the /me form.
pub fn chat_me(nick: &str, text: &str) -> String {
    format!("** {} {}", nick, text)
}

/// `$To: <to> From: <from> $<<sign>> <text>` - private message.
pub fn pm(from: &str, to: &str, sign: &str, text: &str) -> String {
    format!("$To: {} From: {} $<{}> {}", to, from, sign, text)
}

/// `$MCTo: <to> $<from> <text>` - private main-chat message.
pub fn mc_to(from: &str, to: &str, text: &str) -> String {
    format!("$MCTo: {} ${} {}", to, from, text)
}

/// `$MyINFO $ALL <nick> <desc>$ $<speed>$<email>$<share>$`
pub fn my_info(nick: &str, desc: &str, speed: &str, email: &str, share: &str) -> String {
    format!("$MyINFO $ALL {} {}$ ${}${}${}$", nick, desc, speed, email, share)
}

/// `$Quit <nick>`
pub fn quit(nick: &str) -> String {
    format!("$Quit {}", nick)
}

/// `$NickList <nick>$$` - single entry; collection caches concatenate these.
pub fn nick_list_entry(nick: &str) -> String {
    format!("$NickList {}$$", nick)
}

/// `$OpList <nick>$$`
pub fn op_list(nick: &str) -> String {
    format!("$OpList {}$$", nick)
}

/// `$BotList <nick>$$`
pub fn bot_list(nick: &str) -> String {
    format!("$BotList {}$$", nick)
}

/// `$UserIP <nick> <ip>$$` - single-user form.
pub fn user_ip(nick: &str, ip: &str) -> String {
    format!("$UserIP {} {}$$", nick, ip)
}

/// `$UserIP <list>` - pre-joined `nick ip$$` list form.
pub fn user_ip_list(list: &str) -> String {
    format!("$UserIP {}", list)
}

/// `$ConnectToMe <nick> <ip>:<port><extra>`
pub fn connect_to_me(nick: &str, ip: &str, port: u16, extra: &str) -> String {
    format!("$ConnectToMe {} {}:{}{}", nick, ip, port, extra)
}

/// `$RevConnectToMe <from> <to>`
pub fn rev_connect_to_me(from: &str, to: &str) -> String {
    format!("$RevConnectToMe {} {}", from, to)
}

/// Long search form with prebuilt limits and pattern.
pub fn search(addr: &str, limits: &str, pattern: &str) -> String {
    format!("$Search {} {}{}", addr, limits, pattern)
}

/// Long TTH search form, as emitted when downgrading a short frame.
pub fn search_tth(addr: &str, tth: &str, passive: bool) -> String {
    if passive {
        format!("$Search Hub:{} F?T?0?9?TTH:{}", addr, tth)
    } else {
        format!("$Search {} F?T?0?9?TTH:{}", addr, tth)
    }
}

/// `$SA <tth> <ip:port>` - short active search.
pub fn sa(tth: &str, addr: &str) -> String {
    format!("$SA {} {}", tth, addr)
}

/// `$SP <tth> <nick>` - short passive search.
pub fn sp(tth: &str, nick: &str) -> String {
    format!("$SP {} {}", tth, nick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{McToArgs, MyInfoArgs, ToArgs};

    #[test]
    fn builders_match_parsers() {
        let frame = my_info("alice", "d <++ V:1,M:A,H:0/0/1,S:2>", "100\u{1}", "a@b", "42");
        let parsed = MyInfoArgs::parse(&frame).unwrap();
        assert_eq!(parsed.to_frame(), frame);

        let frame = pm("alice", "bob", "alice", "hi");
        let parsed = ToArgs::parse(&frame).unwrap();
        assert_eq!(parsed.from, "alice");
        assert_eq!(parsed.to, "bob");

        let frame = mc_to("alice", "bob", "hi");
        let parsed = McToArgs::parse(&frame).unwrap();
        assert_eq!(parsed.from, "alice");
    }

    #[test]
    fn hub_name_with_and_without_topic() {
        assert_eq!(hub_name("TheHub", ""), "$HubName TheHub");
        assert_eq!(hub_name("TheHub", "news"), "$HubName TheHub - news");
    }

    #[test]
    fn short_frames() {
        assert_eq!(op_list("alice"), "$OpList alice$$");
        assert_eq!(user_ip("alice", "1.2.3.4"), "$UserIP alice 1.2.3.4$$");
        assert_eq!(connect_to_me("bob", "1.2.3.4", 412, "S"), "$ConnectToMe bob 1.2.3.4:412S");
    }

    #[test]
    fn tth_search_forms() {
        let tth = "C".repeat(39);
        assert_eq!(
            search_tth("1.2.3.4:412", &tth, false),
            format!("$Search 1.2.3.4:412 F?T?0?9?TTH:{}", tth)
        );
        assert_eq!(
            search_tth("carol", &tth, true),
            format!("$Search Hub:carol F?T?0?9?TTH:{}", tth)
        );
    }
}
