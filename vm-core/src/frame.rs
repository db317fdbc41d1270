//! Fixed-size records pushed onto the frame stacks: one shadow frame per
//! `Call`, one table entry per `Arg`/`Var` reservation.
//!
//! Grounded on `§6.3`/`§6.4` of the format spec and the call/ret handling
//! sketched in `bc_interpreter.h`.

/// Saved interpreter state pushed by `Call` and restored by `Ret`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShadowFrame {
    pub xtable_state: u32,
    pub atp: u32,
    pub lvtp: u32,
    pub return_sp: u32,
    pub return_ip: u32,
}

impl ShadowFrame {
    pub const ENCODED_LEN: usize = 20;

    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..4].copy_from_slice(&self.xtable_state.to_le_bytes());
        buf[4..8].copy_from_slice(&self.atp.to_le_bytes());
        buf[8..12].copy_from_slice(&self.lvtp.to_le_bytes());
        buf[12..16].copy_from_slice(&self.return_sp.to_le_bytes());
        buf[16..20].copy_from_slice(&self.return_ip.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::ENCODED_LEN]) -> Self {
        ShadowFrame {
            xtable_state: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            atp: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            lvtp: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            return_sp: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            return_ip: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
        }
    }
}

/// A single reservation in the argument table (AT) or local-variable table
/// (LVT): how big it is, and where its bytes live on the value stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableEntry {
    pub size: u32,
    pub address: u32,
}

impl TableEntry {
    pub const ENCODED_LEN: usize = 8;

    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.address.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::ENCODED_LEN]) -> Self {
        TableEntry {
            size: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            address: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_frame_round_trips() {
        let frame = ShadowFrame { xtable_state: 1, atp: 2, lvtp: 3, return_sp: 4, return_ip: 5 };
        assert_eq!(ShadowFrame::from_bytes(&frame.to_bytes()), frame);
    }

    #[test]
    fn table_entry_round_trips() {
        let entry = TableEntry { size: 16, address: 128 };
        assert_eq!(TableEntry::from_bytes(&entry.to_bytes()), entry);
    }
}
