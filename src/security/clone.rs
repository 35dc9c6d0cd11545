//! Clone detection.
//!
//! A clone is a second session from the same IP whose MyINFO matches an
//! existing one after two unstable regions are blanked: the mode field
//! between `,M:` and `,H:` (one well-known client flips its second
//! instance to passive) and the hub counts between `,H:` and `,S:`
//! (clients cannot predict them before connecting).

use std::sync::Arc;

use crate::state::collection::UserCollection;
use crate::state::user::UserEntry;

/// Strip the `$MyINFO $ALL <nick> ` prefix and blank the unstable regions.
///
/// Returns `None` when the frame does not carry the expected prefix.
pub fn normalize_my_info(my_info: &str, nick: &str) -> Option<String> {
    let prefix_len = "$MyINFO $ALL ".len() + nick.len() + 1;

    if my_info.len() < prefix_len || !my_info.starts_with("$MyINFO $ALL ") {
        return None;
    }

    let mut part = my_info[prefix_len..].to_string();

    erase_between(&mut part, ",M:", ",H:");
    erase_between(&mut part, ",H:", ",S:");
    Some(part)
}

fn erase_between(part: &mut String, from: &str, to: &str) {
    if let (Some(start), Some(end)) = (part.find(from), part.find(to)) {
        if end > start {
            part.replace_range(start + from.len()..end, "");
        }
    }
}

/// Result of a clone scan.
#[derive(Debug)]
pub struct CloneHit {
    /// Nick of the last matching existing session.
    pub existing_nick: String,
    /// Its share, for the operator report.
    pub existing_share: u64,
}

/// Count in-list sessions from `ip` whose normalized MyINFO equals the
/// candidate's. A hit at `detect_count` matches makes the candidate a
/// clone.
pub fn find_clone(
    users: &UserCollection,
    candidate: &Arc<UserEntry>,
    candidate_part: &str,
    ip: &str,
    max_class: i32,
    detect_count: u32,
) -> Option<CloneHit> {
    if detect_count == 0 {
        return None;
    }

    let mut count = 0u32;
    let mut last: Option<CloneHit> = None;

    for entry in users.snapshot() {
        if entry.hash == candidate.hash {
            continue;
        }

        let user = entry.user.read();

        if !user.in_list
            || user.my_info.is_empty()
            || user.class.value() > max_class
            || user.ip != ip
        {
            continue;
        }

        let Some(part) = normalize_my_info(&user.my_info, &user.nick) else {
            continue;
        };

        if part == candidate_part {
            count += 1;
            last = Some(CloneHit {
                existing_nick: user.nick.clone(),
                existing_share: user.share,
            });

            // detect_count counts the candidate itself, so one fewer
            // existing match suffices.
            if count + 1 >= detect_count {
                return last;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::user::UserEntry;

    fn myinfo(nick: &str, mode: &str, hubs: &str, share: u64) -> String {
        format!("$MyINFO $ALL {nick} desc <++ V:0.868,M:{mode},H:{hubs},S:3>$ $100\u{1}$${share}$")
    }

    #[test]
    fn normalization_blanks_unstable_regions() {
        let a = normalize_my_info(&myinfo("eve1", "A", "1/0/0", 5), "eve1").unwrap();
        let b = normalize_my_info(&myinfo("eve2", "P", "3/1/0", 5), "eve2").unwrap();
        assert_eq!(a, b);

        // Different slots survive normalization.
        let c = normalize_my_info(
            "$MyINFO $ALL eve3 desc <++ V:0.868,M:A,H:1/0/0,S:9>$ $100\u{1}$$5$",
            "eve3",
        )
        .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn bad_prefix_is_rejected() {
        assert!(normalize_my_info("$Search nope", "nope").is_none());
    }

    #[test]
    fn detects_second_session_at_count_two() {
        let users = UserCollection::new("users", "$NickList ", false, false, false);

        let eve1 = Arc::new(UserEntry::new("eve1", None, 0));
        {
            let mut user = eve1.user.write();
            user.my_info = myinfo("eve1", "A", "1/0/0", 1000);
            user.share = 1000;
            user.ip = "10.9.9.9".to_string();
            user.in_list = true;
        }
        users.add(Arc::clone(&eve1));

        let eve2 = Arc::new(UserEntry::new("eve2", None, 0));
        let part = normalize_my_info(&myinfo("eve2", "P", "9/9/9", 1000), "eve2").unwrap();

        let hit = find_clone(&users, &eve2, &part, "10.9.9.9", 1, 2).unwrap();
        assert_eq!(hit.existing_nick, "eve1");
        assert_eq!(hit.existing_share, 1000);

        // Different IP is not a clone.
        assert!(find_clone(&users, &eve2, &part, "10.0.0.1", 1, 2).is_none());
        // Disabled detection never fires.
        assert!(find_clone(&users, &eve2, &part, "10.9.9.9", 1, 0).is_none());
    }

    #[test]
    fn high_class_sessions_are_skipped() {
        let users = UserCollection::new("users", "$NickList ", false, false, false);
        let op = Arc::new(UserEntry::new("op1", None, 0));
        {
            let mut user = op.user.write();
            user.my_info = myinfo("op1", "A", "1/0/0", 7);
            user.class = crate::state::user::UserClass::Op;
            user.ip = "10.9.9.9".to_string();
            user.in_list = true;
        }
        users.add(op);

        let probe = Arc::new(UserEntry::new("probe", None, 0));
        let part = normalize_my_info(&myinfo("probe", "A", "1/0/0", 7), "probe").unwrap();
        assert!(find_clone(&users, &probe, &part, "10.9.9.9", 1, 2).is_none());
    }
}
