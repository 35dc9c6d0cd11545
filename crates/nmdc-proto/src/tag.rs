//! Client tag parsing.
//!
//! Descriptions carry a bracketed tag like `<++ V:0.868,M:A,H:1/0/2,S:3>`
//! describing the client build, connection mode, hub counts and upload
//! slots. The tag is structural input to policy (mode detection, hub/slot
//! limits); absent or unreadable tags are legal and yield [`ClientMode::NoTag`].

/// Connection mode advertised in the `M:` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// `M:A` - accepts inbound peer connections.
    Active,
    /// `M:P` - requires RevConnectToMe.
    Passive,
    /// `M:5` - behind a SOCKS5 proxy.
    Sock5,
    /// Unrecognized mode letter.
    Other,
    /// Description carried no tag at all.
    NoTag,
}

impl ClientMode {
    /// Short marker used when the hub prefixes descriptions by mode.
    pub fn marker(&self) -> &'static str {
        match self {
            ClientMode::Active => "[A]",
            ClientMode::Passive => "[P]",
            ClientMode::Sock5 => "[5]",
            ClientMode::Other | ClientMode::NoTag => "[?]",
        }
    }
}

/// A parsed client tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientTag {
    /// Client identifier, the part before ` V:`.
    pub client: String,
    /// Reported version, if it parsed as a number.
    pub version: Option<f64>,
    /// Connection mode.
    pub mode: ClientMode,
    /// Total open hubs across the three counts.
    pub hubs_total: i64,
    /// Hubs where the user is unregistered, if split counts were given.
    pub hubs_guest: Option<i64>,
    /// Hubs where the user is registered.
    pub hubs_reg: Option<i64>,
    /// Hubs where the user is an operator.
    pub hubs_op: Option<i64>,
    /// Open upload slots.
    pub slots: i64,
    /// Upload limit from `L:` or `B:`, when present.
    pub limit: Option<i64>,
}

impl ClientTag {
    /// Locate a tag inside a description.
    ///
    /// Returns the byte offset of the opening `<` when the description ends
    /// with a closed bracket pair, mirroring how the hub splits the visible
    /// description from the tag when rebuilding MyINFO.
    pub fn position(desc: &str) -> Option<usize> {
        if !desc.ends_with('>') {
            return None;
        }

        desc.rfind('<')
    }

    /// Parse the tag out of a full description.
    ///
    /// Descriptions without a bracket pair yield a `NoTag` placeholder so
    /// callers always have a mode to apply policy to.
    pub fn parse(desc: &str) -> ClientTag {
        let Some(pos) = Self::position(desc) else {
            return Self::no_tag();
        };

        let inner = &desc[pos + 1..desc.len() - 1];
        Self::parse_inner(inner).unwrap_or_else(Self::no_tag)
    }

    fn no_tag() -> ClientTag {
        ClientTag {
            client: String::new(),
            version: None,
            mode: ClientMode::NoTag,
            hubs_total: -1,
            hubs_guest: None,
            hubs_reg: None,
            hubs_op: None,
            slots: -1,
            limit: None,
        }
    }

    fn parse_inner(inner: &str) -> Option<ClientTag> {
        let v_pos = inner.find(" V:")?;
        let client = inner[..v_pos].to_string();
        let rest = &inner[v_pos + 3..];

        let mut tag = ClientTag {
            client,
            version: None,
            mode: ClientMode::Other,
            hubs_total: -1,
            hubs_guest: None,
            hubs_reg: None,
            hubs_op: None,
            slots: -1,
            limit: None,
        };

        for (i, field) in rest.split(',').enumerate() {
            if i == 0 {
                tag.version = field.parse().ok();
                continue;
            }

            let Some((name, value)) = field.split_once(':') else {
                continue;
            };

            match name {
                "M" => {
                    tag.mode = match value {
                        "A" => ClientMode::Active,
                        "P" => ClientMode::Passive,
                        "5" => ClientMode::Sock5,
                        _ => ClientMode::Other,
                    }
                }
                "H" => {
                    let mut counts = value.split('/').map(|c| c.parse::<i64>().ok());
                    let guest = counts.next().flatten();
                    let reg = counts.next().flatten();
                    let op = counts.next().flatten();

                    match (guest, reg, op) {
                        (Some(g), Some(r), Some(o)) => {
                            tag.hubs_guest = Some(g);
                            tag.hubs_reg = Some(r);
                            tag.hubs_op = Some(o);
                            tag.hubs_total = g + r + o;
                        }
                        (Some(g), None, None) => tag.hubs_total = g,
                        _ => tag.hubs_total = -1,
                    }
                }
                "S" => tag.slots = value.parse().unwrap_or(-1),
                "L" | "B" => tag.limit = value.parse().ok(),
                _ => {}
            }
        }

        Some(tag)
    }
}
