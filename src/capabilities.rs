//! Server capability bitset (spec §3: `client.capabilities`).

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u16 {
        const LITERAL_PLUS = 1 << 0;
        const MULTIAPPEND = 1 << 1;
        const CONDSTORE = 1 << 2;
        const QRESYNC = 1 << 3;
        const IDLE = 1 << 4;
        const UIDPLUS = 1 << 5;
    }
}

impl Capabilities {
    /// Parse a `CAPABILITY` response-text value (space-separated tokens).
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut caps = Self::empty();
        for tok in text.split_whitespace() {
            match tok.to_ascii_uppercase().as_str() {
                "LITERAL+" => caps |= Self::LITERAL_PLUS,
                "MULTIAPPEND" => caps |= Self::MULTIAPPEND,
                "CONDSTORE" => caps |= Self::CONDSTORE,
                "QRESYNC" => caps |= Self::QRESYNC,
                "IDLE" => caps |= Self::IDLE,
                "UIDPLUS" => caps |= Self::UIDPLUS,
                _ => {}
            }
        }
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_picks_up_known_tokens() {
        let caps = Capabilities::parse("IMAP4rev1 LITERAL+ MULTIAPPEND IDLE STARTTLS");
        assert!(caps.contains(Capabilities::LITERAL_PLUS));
        assert!(caps.contains(Capabilities::MULTIAPPEND));
        assert!(caps.contains(Capabilities::IDLE));
        assert!(!caps.contains(Capabilities::QRESYNC));
    }
}
