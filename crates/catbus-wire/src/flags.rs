//! Flag bytes for the service channel

/// Service message header flags (1 byte)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeaderFlags(pub u8);

impl HeaderFlags {
    pub const NONE: HeaderFlags = HeaderFlags(0);

    /// Sender is stopping; drop it as leader now instead of timing out
    pub const SHUTDOWN: u8 = 0b0000_0001;

    #[inline]
    pub fn new(bits: u8) -> Self {
        HeaderFlags(bits)
    }

    #[inline]
    pub fn is_shutdown(self) -> bool {
        self.0 & Self::SHUTDOWN != 0
    }

    #[inline]
    pub fn set_shutdown(&mut self, value: bool) {
        if value {
            self.0 |= Self::SHUTDOWN;
        } else {
            self.0 &= !Self::SHUTDOWN;
        }
    }
}

/// Per-offer flags (1 byte)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OfferFlags(pub u8);

impl OfferFlags {
    pub const NONE: OfferFlags = OfferFlags(0);

    /// Offer belongs to a Team (every member gossips)
    pub const TEAM: u8 = 0b0000_0001;
    /// Sender currently holds the SERVER role
    pub const SERVER_VALID: u8 = 0b0000_0010;

    #[inline]
    pub fn new(bits: u8) -> Self {
        OfferFlags(bits)
    }

    #[inline]
    pub fn is_team(self) -> bool {
        self.0 & Self::TEAM != 0
    }

    #[inline]
    pub fn is_server_valid(self) -> bool {
        self.0 & Self::SERVER_VALID != 0
    }

    #[inline]
    pub fn set_team(&mut self, value: bool) {
        if value {
            self.0 |= Self::TEAM;
        } else {
            self.0 &= !Self::TEAM;
        }
    }

    #[inline]
    pub fn set_server_valid(&mut self, value: bool) {
        if value {
            self.0 |= Self::SERVER_VALID;
        } else {
            self.0 &= !Self::SERVER_VALID;
        }
    }
}

impl From<u8> for OfferFlags {
    fn from(bits: u8) -> Self {
        OfferFlags(bits)
    }
}

impl From<OfferFlags> for u8 {
    fn from(flags: OfferFlags) -> Self {
        flags.0
    }
}
