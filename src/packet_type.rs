use bitflags::bitflags;

bitflags! {
    /// APRS payload classification of a packet.
    ///
    /// Several bits may be set at once (a position report with a weather
    /// symbol is `POSITION | WX`), but some combinations are never produced
    /// by the decoder, see [`PacketType::is_consistent`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketType: u16 {
        const POSITION   = 1 << 0;
        const OBJECT     = 1 << 1;
        const ITEM       = 1 << 2;
        const MESSAGE    = 1 << 3;
        const NWS        = 1 << 4;
        const WX         = 1 << 5;
        const TELEMETRY  = 1 << 6;
        const QUERY      = 1 << 7;
        const STATUS     = 1 << 8;
        const USERDEF    = 1 << 9;
        const CWOP       = 1 << 10;
        const STATCAPA   = 1 << 11;
        const THIRDPARTY = 1 << 12;
    }
}

bitflags! {
    /// Per-packet state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        /// lat/lon hold a validated position
        const HASPOS = 1 << 0;
        /// already seen within the dupe window
        const DUPE   = 1 << 1;
    }
}

impl PacketType {
    /// Packets whose position is worth remembering in the history cache.
    pub fn is_history_interesting(&self) -> bool {
        self.intersects(PacketType::POSITION | PacketType::OBJECT | PacketType::ITEM)
    }

    /// False for combinations the decoder must never produce.
    pub fn is_consistent(&self) -> bool {
        !self.contains(PacketType::OBJECT | PacketType::ITEM)
            && !self.contains(PacketType::MESSAGE | PacketType::TELEMETRY)
            && !self.contains(PacketType::MESSAGE | PacketType::QUERY)
    }

    /// Short single-letter-per-flag rendering used by the CLI output.
    pub fn short_names(&self) -> String {
        const NAMES: [(PacketType, char); 13] = [
            (PacketType::POSITION, 'p'),
            (PacketType::OBJECT, 'o'),
            (PacketType::ITEM, 'i'),
            (PacketType::MESSAGE, 'm'),
            (PacketType::NWS, 'n'),
            (PacketType::WX, 'w'),
            (PacketType::TELEMETRY, 't'),
            (PacketType::QUERY, 'q'),
            (PacketType::STATUS, 's'),
            (PacketType::USERDEF, 'u'),
            (PacketType::CWOP, 'c'),
            (PacketType::STATCAPA, 'k'),
            (PacketType::THIRDPARTY, '3'),
        ];

        let names: String = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, c)| *c)
            .collect();
        if names.is_empty() {
            "-".to_string()
        } else {
            names
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_and_item_together_is_inconsistent() {
        let t = PacketType::OBJECT | PacketType::ITEM;
        assert!(!t.is_consistent());
        assert!((PacketType::POSITION | PacketType::WX).is_consistent());
    }

    #[test]
    fn history_interest() {
        assert!(PacketType::OBJECT.is_history_interesting());
        assert!(!PacketType::MESSAGE.is_history_interesting());
        assert!(!PacketType::empty().is_history_interesting());
    }

    #[test]
    fn short_names_render() {
        assert_eq!((PacketType::POSITION | PacketType::WX).short_names(), "pw");
        assert_eq!(PacketType::empty().short_names(), "-");
    }
}
