use std::fmt;

/// Server-assigned integer identifying a session for the lifetime of the
/// process. Monotonically increasing, never reused (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub(crate) u32);

impl ConnectionId {
    /// Interprets a wire `int32` pairing id (§6). Negative values (the `-1`
    /// "unknown" sentinel used by clients, or a corrupt id) have no
    /// corresponding session and decode to `None`.
    #[inline]
    pub fn from_wire(id: i32) -> Option<Self> {
        u32::try_from(id).ok().map(ConnectionId)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_wire_id_has_no_connection() {
        assert_eq!(ConnectionId::from_wire(-1), None);
    }

    #[test]
    fn non_negative_wire_id_round_trips() {
        assert_eq!(ConnectionId::from_wire(7).unwrap().as_u32(), 7);
    }
}
