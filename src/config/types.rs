//! Configuration type definitions.

use serde::Deserialize;
use std::net::SocketAddr;

use super::defaults::*;
use super::flood::{FloodConfig, HubFloodConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub nick: NickConfig,
    #[serde(default)]
    pub tag: TagConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub myinfo: MyInfoConfig,
    #[serde(default)]
    pub flood: FloodConfig,
    #[serde(default)]
    pub hub_flood: HubFloodConfig,
    #[serde(default)]
    pub bans: BanConfig,
    #[serde(default)]
    pub load: LoadConfig,
    /// Country-code zones with their own user caps. Zone 0 is the implicit
    /// main zone governed by `limits.max_users_total`.
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    /// Registered accounts, the lookup contract normally served by the
    /// external accounts store.
    #[serde(default)]
    pub registered: Vec<RegBlock>,
}

/// Hub identity and process-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "name", alias = "hub_name")]
    pub hub_name: String,
    pub hub_topic: String,
    pub hub_desc: String,
    /// Public address advertised to pingers, `host[:port]`.
    pub hub_host: String,
    pub hub_owner: String,
    pub hub_category: String,
    pub hub_encoding: String,
    /// Icon and logo URLs pushed to pinger sessions.
    pub hub_icon_url: String,
    pub hub_logo_url: String,
    /// Product name and version reported in the lock and to pingers.
    pub hub_version_name: String,
    pub hub_version: String,
    pub listen: Vec<SocketAddr>,
    /// Hub sits behind a TLS terminating proxy; adds `TLS_` to the lock.
    pub tls_proxy: bool,
    /// Comma-joined failover host list for `$FailOver` clients.
    pub failover_hosts: String,
    /// Redirect targets for redirectable closes, tried round-robin.
    pub redirects: Vec<String>,
    /// Message of the day, sent after login.
    pub motd: String,
    /// Welcome line broadcast when a user logs in; `%nick%` is substituted.
    pub welcome: String,
    /// Prometheus endpoint port; 0 disables it.
    pub metrics_port: u16,
    pub log_format: LogFormat,
    /// Config re-read cadence in seconds; 0 disables.
    pub reload_interval: u64,
    /// Minimum outbound batch size before ZPipe compression kicks in.
    pub zlib_min_len: usize,
    /// Hard cap for any inbound frame.
    pub max_frame_len: usize,
    /// Per-command length caps, enforced before parsing.
    pub max_len_myinfo: usize,
    pub max_len_supports: usize,
    pub max_len_version: usize,
    pub max_len_search: usize,
    pub max_len_extjson: usize,
    pub max_len_in: usize,
    pub max_len_myhuburl: usize,
    pub max_len_handshake: usize,
    /// Tell senders when a wrong source IP gets replaced in their
    /// requests.
    pub wrongip_notice: bool,
    /// Validate `$Key` against the lock and drop mismatches.
    pub drop_invalid_key: bool,
    /// Report NUL-character frames to the operator chat.
    pub nullchars_report: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            hub_name: default_hub_name(),
            hub_topic: String::new(),
            hub_desc: String::new(),
            hub_host: String::new(),
            hub_owner: String::new(),
            hub_category: String::new(),
            hub_encoding: default_encoding(),
            hub_icon_url: String::new(),
            hub_logo_url: String::new(),
            hub_version_name: "nmdcd".to_string(),
            hub_version: default_hub_version(),
            listen: default_listen(),
            tls_proxy: false,
            failover_hosts: String::new(),
            redirects: Vec::new(),
            motd: String::new(),
            welcome: String::new(),
            metrics_port: 0,
            log_format: LogFormat::default(),
            reload_interval: 0,
            zlib_min_len: default_zlib_min_len(),
            max_frame_len: default_max_frame_len(),
            max_len_myinfo: default_max_len_myinfo(),
            max_len_supports: default_max_len_supports(),
            max_len_version: default_max_len_version(),
            max_len_search: default_max_len_search(),
            max_len_extjson: default_max_len_extjson(),
            max_len_in: default_max_len_in(),
            max_len_myhuburl: default_max_len_myhuburl(),
            max_len_handshake: default_max_len_handshake(),
            wrongip_notice: false,
            drop_invalid_key: false,
            nullchars_report: false,
        }
    }
}

/// Share bounds in mebibytes; 0 means unbounded.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default)]
pub struct ShareLimits {
    pub min: u64,
    pub max: u64,
}

/// Capacity and class-gate settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_users_total: u32,
    /// Per-IP session cap; 0 disables.
    pub max_users_from_ip: u32,
    /// Passive user cap; -1 disables.
    pub max_users_passive: i64,
    /// Headroom on top of the caps per privileged class.
    pub max_extra_regs: u32,
    pub max_extra_vips: u32,
    pub max_extra_ops: u32,
    pub max_extra_cheefs: u32,
    pub max_extra_admins: u32,
    pub max_extra_pings: u32,
    /// Share bounds by class.
    pub share_guest: ShareLimits,
    pub share_reg: ShareLimits,
    pub share_vip: ShareLimits,
    pub share_op: ShareLimits,
    /// Passive users get share minima scaled by this factor.
    pub min_share_factor_passive: f64,
    /// Share floors (MiB) below which search and download are revoked.
    pub min_share_use_hub: u64,
    pub min_share_use_hub_reg: u64,
    pub min_share_use_hub_vip: u64,
    /// Class floors for search and download.
    pub min_class_use_hub: i32,
    pub min_class_use_hub_passive: i32,
    /// Results one passive search may return before the rest are dropped.
    pub max_sr_per_search: u32,
    /// Class thresholds for presentation and operator commands.
    pub oplist_class: i32,
    pub user_ip_class: i32,
    pub topic_class: i32,
    pub kick_class: i32,
    pub ban_class: i32,
    pub who_ip_class: i32,
    pub chatonly_bypass_class: i32,
    /// A user may download from users at most this many classes above.
    pub classdif_download: i32,
    pub classdif_pm: i32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_users_total: default_max_users(),
            max_users_from_ip: default_max_users_from_ip(),
            max_users_passive: default_max_users_passive(),
            max_extra_regs: 25,
            max_extra_vips: 25,
            max_extra_ops: 25,
            max_extra_cheefs: 25,
            max_extra_admins: 25,
            max_extra_pings: 5,
            share_guest: ShareLimits::default(),
            share_reg: ShareLimits::default(),
            share_vip: ShareLimits::default(),
            share_op: ShareLimits::default(),
            min_share_factor_passive: default_min_share_factor_passive(),
            min_share_use_hub: 0,
            min_share_use_hub_reg: 0,
            min_share_use_hub_vip: 0,
            min_class_use_hub: 0,
            min_class_use_hub_passive: 0,
            max_sr_per_search: default_max_sr_per_search(),
            oplist_class: default_oplist_class(),
            user_ip_class: default_user_ip_class(),
            topic_class: default_topic_class(),
            kick_class: default_kick_class(),
            ban_class: default_ban_class(),
            who_ip_class: default_who_ip_class(),
            chatonly_bypass_class: default_chatonly_bypass_class(),
            classdif_download: default_classdif_download(),
            classdif_pm: default_classdif_pm(),
        }
    }
}

/// Per-stage login deadlines and the general watchdog, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub key: u64,
    pub valnick: u64,
    pub login: u64,
    pub myinfo: u64,
    pub password: u64,
    pub setpass: u64,
    /// Close when no I/O happened this long past the last send attempt.
    pub inactivity: u64,
    /// Empty-frame probe cadence for frozen-peer detection; 0 disables.
    pub delayed_ping: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        TimeoutsConfig {
            key: default_timeout_key(),
            valnick: default_timeout_valnick(),
            login: default_timeout_login(),
            myinfo: default_timeout_myinfo(),
            password: default_timeout_password(),
            setpass: default_timeout_setpass(),
            inactivity: default_inactivity_window(),
            delayed_ping: default_delayed_ping(),
        }
    }
}

/// Nick validation rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NickConfig {
    /// Length bounds for unregistered users.
    pub min_len: usize,
    pub max_len: usize,
    /// Allowed character set for unregistered users; empty allows all.
    pub chars: String,
    /// Extra forbidden characters on top of the protocol metacharacters.
    pub forbidden_chars: String,
    /// Required prefixes; any match is enough.
    pub prefixes: Vec<String>,
    /// Compare prefixes case-insensitively.
    pub prefix_nocase: bool,
}

impl Default for NickConfig {
    fn default() -> Self {
        NickConfig {
            min_len: default_min_nick(),
            max_len: default_max_nick(),
            chars: String::new(),
            forbidden_chars: String::new(),
            prefixes: Vec::new(),
            prefix_nocase: true,
        }
    }
}

/// Client-tag policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub allow_none: bool,
    pub allow_passive: bool,
    pub allow_sock5: bool,
    pub allow_unknown: bool,
    /// Users at or above this class skip tag validation.
    pub min_class_ignore: i32,
    pub min_hubs: i64,
    pub max_hubs: i64,
    pub min_hubs_guest: i64,
    pub min_hubs_reg: i64,
    pub min_hubs_op: i64,
    pub min_slots: i64,
    pub max_slots: i64,
    /// Minimum hubs-per-slot ratio gate; 0 disables.
    pub min_hub_slot_ratio: f64,
    pub max_hub_slot_ratio: f64,
    /// Client names refused outright.
    pub banned_clients: Vec<String>,
}

impl Default for TagConfig {
    fn default() -> Self {
        TagConfig {
            allow_none: true,
            allow_passive: true,
            allow_sock5: true,
            allow_unknown: true,
            min_class_ignore: default_tag_min_class_ignore(),
            min_hubs: 0,
            max_hubs: default_tag_max_hubs(),
            min_hubs_guest: 0,
            min_hubs_reg: 0,
            min_hubs_op: 0,
            min_slots: 0,
            max_slots: 0,
            min_hub_slot_ratio: 0.0,
            max_hub_slot_ratio: 0.0,
            banned_clients: Vec::new(),
        }
    }
}

/// Main chat and private message policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub max_len: usize,
    pub max_lines: usize,
    /// Minimum class for main chat.
    pub min_class: i32,
    /// Minimum class for private messages.
    pub min_class_pm: i32,
    /// Batch chat through the delayed queue.
    pub delayed: bool,
    /// Allow the `/me` form.
    pub allow_me: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            max_len: default_max_chat_len(),
            max_lines: default_max_chat_lines(),
            min_class: default_min_chat_class(),
            min_class_pm: default_min_chat_class(),
            delayed: false,
            allow_me: true,
        }
    }
}

/// Search policy and pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub min_chars: usize,
    /// Searches allowed per pacing interval.
    pub number: u32,
    /// Pacing intervals by class and mode, in seconds.
    pub int_guest: u64,
    pub int_guest_passive: u64,
    pub int_reg: u64,
    pub int_reg_passive: u64,
    pub int_vip: u64,
    pub int_op: u64,
    pub delayed: bool,
    /// Use the filtered fan-out with TTHS short forms.
    pub use_filter: bool,
    /// Keep LAN and WAN searches apart.
    pub filter_lan: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            min_chars: default_min_search_chars(),
            number: default_search_number(),
            int_guest: default_int_search(),
            int_guest_passive: default_int_search_pas(),
            int_reg: default_int_search_reg(),
            int_reg_passive: default_int_search(),
            int_vip: 10,
            int_op: 5,
            delayed: true,
            use_filter: true,
            filter_lan: false,
        }
    }
}

/// MyINFO rewriting and broadcast policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MyInfoConfig {
    /// Minimum seconds between broadcast MyINFO updates per user.
    pub interval: u64,
    pub delayed: bool,
    /// Keep the tag in the broadcast form.
    pub show_tags: bool,
    /// Keep the speed field; the status byte always survives.
    pub show_speed: bool,
    pub show_email: bool,
    /// Visible description cap; -1 keeps everything before the tag.
    pub desc_len: i64,
    /// Prefix descriptions with the connection-mode marker.
    pub desc_insert_mode: bool,
    /// Clear the TLS status bit for recipients without the flag.
    pub tls_filter: bool,
}

impl Default for MyInfoConfig {
    fn default() -> Self {
        MyInfoConfig {
            interval: default_int_myinfo(),
            delayed: true,
            show_tags: true,
            show_speed: true,
            show_email: true,
            desc_len: default_myinfo_desc_len(),
            desc_insert_mode: false,
            tls_filter: false,
        }
    }
}

/// Clone-detection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Matching sessions needed to call it a clone; 0 disables.
    pub detect_count: u32,
    /// Users above this class are never checked.
    pub max_class: i32,
    /// Nick temp-ban length in seconds.
    pub tban_time: u64,
    /// Also ban the IP for this long; 0 disables.
    pub ip_tban_time: u64,
    pub report: bool,
}

impl Default for CloneConfig {
    fn default() -> Self {
        CloneConfig {
            detect_count: default_clone_detect_count(),
            max_class: default_max_class_check_clone(),
            tban_time: default_clone_tban_time(),
            ip_tban_time: 0,
            report: true,
        }
    }
}

/// Temp-ban and reconnect policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BanConfig {
    /// IP temp-ban length after a failed password, in seconds.
    pub pwd_tmpban: u64,
    /// Nick temp-ban length applied at login to rate-limit reconnects.
    pub reconnect_ban: u64,
    /// Users above this class skip the reconnect ban.
    pub max_class_reconnect: i32,
    /// Classes at or above bypass persistent ban checks.
    pub bypass_class: i32,
    pub clone: CloneConfig,
}

impl Default for BanConfig {
    fn default() -> Self {
        BanConfig {
            pwd_tmpban: default_pwd_tmpban(),
            reconnect_ban: default_reconnect_ban(),
            max_class_reconnect: 0,
            bypass_class: 4,
            clone: CloneConfig::default(),
        }
    }
}

/// System-load sampling thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Loop frequency (events per second) below which the hub starts
    /// degrading, scaled through the five load levels.
    pub min_frequency: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig {
            min_frequency: default_min_frequency(),
        }
    }
}

/// A country-code zone with its own user cap.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    /// Comma-separated ISO country codes, e.g. `"RU,UA,BY"`.
    pub cc: String,
    pub max_users: u32,
}

/// One registered account; the file-backed form of the registration
/// lookup contract.
#[derive(Debug, Clone, Deserialize)]
pub struct RegBlock {
    pub nick: String,
    /// Class floor granted at login.
    pub class: i32,
    /// bcrypt hash of the stored credential.
    #[serde(default)]
    pub password: String,
    /// Plaintext credential for test setups; `password` wins when both set.
    #[serde(default)]
    pub password_plain: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Must set a new password on next login.
    #[serde(default)]
    pub pwd_change: bool,
    #[serde(default)]
    pub hide_share: bool,
    /// Keep this operator out of the op list.
    #[serde(default)]
    pub hide_keys: bool,
    /// Show in the op list even below the oplist class.
    #[serde(default)]
    pub show_keys: bool,
    #[serde(default)]
    pub hide_chat: bool,
    #[serde(default)]
    pub hide_ctm_msg: bool,
    #[serde(default)]
    pub hide_kick: bool,
    /// Protect from kicks by classes at or below this.
    #[serde(default)]
    pub class_protect: i32,
    #[serde(default)]
    pub class_hide_kick: i32,
    /// Only allow login from this IP.
    #[serde(default)]
    pub auth_ip: String,
    #[serde(default)]
    pub alternate_ip: String,
    /// Present this IP to other users instead of the real one.
    #[serde(default)]
    pub fake_ip: String,
}
