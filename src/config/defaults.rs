//! Serde default helpers for configuration structs.

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_listen() -> Vec<std::net::SocketAddr> {
    vec!["0.0.0.0:411".parse().expect("static listen address")]
}

pub(crate) fn default_hub_name() -> String {
    "NMDC Hub".to_string()
}

pub(crate) fn default_hub_version() -> String {
    "1,0091".to_string()
}

pub(crate) fn default_encoding() -> String {
    "CP1252".to_string()
}

pub(crate) fn default_max_users() -> u32 {
    5000
}

pub(crate) fn default_max_users_from_ip() -> u32 {
    0
}

pub(crate) fn default_max_users_passive() -> i64 {
    -1
}

pub(crate) fn default_max_sr_per_search() -> u32 {
    25
}

pub(crate) fn default_min_share_factor_passive() -> f64 {
    1.0
}

pub(crate) fn default_timeout_key() -> u64 {
    60
}

pub(crate) fn default_timeout_valnick() -> u64 {
    60
}

pub(crate) fn default_timeout_login() -> u64 {
    600
}

pub(crate) fn default_timeout_myinfo() -> u64 {
    120
}

pub(crate) fn default_timeout_password() -> u64 {
    300
}

pub(crate) fn default_timeout_setpass() -> u64 {
    300
}

pub(crate) fn default_inactivity_window() -> u64 {
    270
}

pub(crate) fn default_delayed_ping() -> u64 {
    60
}

pub(crate) fn default_min_nick() -> usize {
    3
}

pub(crate) fn default_max_nick() -> usize {
    32
}

pub(crate) fn default_tag_min_class_ignore() -> i32 {
    5
}

pub(crate) fn default_tag_max_hubs() -> i64 {
    100
}

pub(crate) fn default_max_chat_len() -> usize {
    512
}

pub(crate) fn default_max_chat_lines() -> usize {
    5
}

pub(crate) fn default_min_chat_class() -> i32 {
    0
}

pub(crate) fn default_min_search_chars() -> usize {
    3
}

pub(crate) fn default_search_number() -> u32 {
    3
}

pub(crate) fn default_int_search() -> u64 {
    32
}

pub(crate) fn default_int_search_pas() -> u64 {
    48
}

pub(crate) fn default_int_search_reg() -> u64 {
    16
}

pub(crate) fn default_int_myinfo() -> u64 {
    60
}

pub(crate) fn default_myinfo_desc_len() -> i64 {
    -1
}

pub(crate) fn default_pwd_tmpban() -> u64 {
    300
}

pub(crate) fn default_reconnect_ban() -> u64 {
    0
}

pub(crate) fn default_clone_detect_count() -> u32 {
    0
}

pub(crate) fn default_clone_tban_time() -> u64 {
    3600
}

pub(crate) fn default_max_class_check_clone() -> i32 {
    1
}

pub(crate) fn default_max_frame_len() -> usize {
    10240
}

pub(crate) fn default_max_len_myinfo() -> usize {
    512
}

pub(crate) fn default_max_len_supports() -> usize {
    1024
}

pub(crate) fn default_max_len_version() -> usize {
    64
}

pub(crate) fn default_max_len_search() -> usize {
    512
}

pub(crate) fn default_max_len_extjson() -> usize {
    1024
}

pub(crate) fn default_max_len_in() -> usize {
    1024
}

pub(crate) fn default_max_len_myhuburl() -> usize {
    256
}

pub(crate) fn default_max_len_handshake() -> usize {
    256
}

pub(crate) fn default_zlib_min_len() -> usize {
    128
}

pub(crate) fn default_min_frequency() -> f64 {
    0.4
}

pub(crate) fn default_oplist_class() -> i32 {
    4
}

pub(crate) fn default_user_ip_class() -> i32 {
    4
}

pub(crate) fn default_topic_class() -> i32 {
    4
}

pub(crate) fn default_kick_class() -> i32 {
    4
}

pub(crate) fn default_ban_class() -> i32 {
    5
}

pub(crate) fn default_who_ip_class() -> i32 {
    4
}

pub(crate) fn default_chatonly_bypass_class() -> i32 {
    4
}

pub(crate) fn default_classdif_download() -> i32 {
    1
}

pub(crate) fn default_classdif_pm() -> i32 {
    10
}

pub(crate) fn default_proto_flood_report_time() -> u64 {
    60
}

pub(crate) fn default_proto_flood_tban_time() -> u64 {
    300
}

pub(crate) fn default_max_class_proto_flood() -> i32 {
    2
}
