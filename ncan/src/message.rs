//! Handling of frames
//!
//! [`Frame`] stores the controller's mailbox representation directly: the
//! MBX_ID word plus the payload bytes that split into the DATA_H/DATA_L
//! register pair. Standard identifiers sit at bit 18 of the ID word, bit 29
//! flags a remote request and bit 30 an extended identifier.

use embedded_can::{ExtendedId, Id, StandardId};

pub(crate) const RTR: u32 = 1 << 29;
pub(crate) const XTD: u32 = 1 << 30;

/// Classic CAN frame with up to 8 data bytes
///
/// Constructed through [`embedded_can::Frame`] (`Frame::new`,
/// `Frame::new_remote`) or produced by the driver when a receive mailbox is
/// drained.
#[derive(Copy, Clone, Debug)]
pub struct Frame {
    id_word: u32,
    dlc: u8,
    data: [u8; 8],
}

impl Frame {
    /// Encode a CAN identifier into the MBX_ID register layout
    pub(crate) fn encode_id(id: Id) -> u32 {
        match id {
            Id::Standard(id) => u32::from(id.as_raw()) << 18,
            Id::Extended(id) => id.as_raw() | XTD,
        }
    }

    /// Reassemble a frame from the mailbox registers
    pub(crate) fn from_raw(id_word: u32, cntrl_word: u32, data_h: u32, data_l: u32) -> Self {
        let mut data = [0; 8];
        data[..4].copy_from_slice(&data_h.to_be_bytes());
        data[4..].copy_from_slice(&data_l.to_be_bytes());
        Self {
            id_word,
            dlc: (cntrl_word & 0xF).min(8) as u8,
            data,
        }
    }

    pub(crate) fn id_word(&self) -> u32 {
        self.id_word
    }

    /// MBX_CNTRL value: the data length code in bits [3:0]
    pub(crate) fn cntrl_word(&self) -> u32 {
        u32::from(self.dlc)
    }

    /// Payload bytes 0..4, MSB first
    pub(crate) fn data_h(&self) -> u32 {
        u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    /// Payload bytes 4..8, MSB first
    pub(crate) fn data_l(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    pub(crate) fn mark_remote(&mut self) {
        self.id_word |= RTR;
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut payload = [0; 8];
        payload[..data.len()].copy_from_slice(data);
        Some(Self {
            id_word: Self::encode_id(id.into()),
            dlc: data.len() as u8,
            data: payload,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(Self {
            id_word: Self::encode_id(id.into()) | RTR,
            dlc: dlc as u8,
            data: [0; 8],
        })
    }

    fn is_extended(&self) -> bool {
        self.id_word & XTD != 0
    }

    fn is_remote_frame(&self) -> bool {
        self.id_word & RTR != 0
    }

    fn id(&self) -> Id {
        if self.is_extended() {
            // The mask ensures the ID is in range for a 29-bit integer
            Id::Extended(unsafe {
                ExtendedId::new_unchecked(self.id_word & ExtendedId::MAX.as_raw())
            })
        } else {
            // The mask ensures the ID is in range for an 11-bit integer
            Id::Standard(unsafe {
                StandardId::new_unchecked((self.id_word >> 18) as u16 & StandardId::MAX.as_raw())
            })
        }
    }

    fn dlc(&self) -> usize {
        self.dlc.into()
    }

    fn data(&self) -> &[u8] {
        if self.is_remote_frame() {
            &[]
        } else {
            &self.data[..self.dlc.into()]
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_can::Frame as _;

    #[test]
    fn standard_id_round_trip() {
        let id = StandardId::new(0x123).unwrap();
        let frame = Frame::new(id, &[1, 2, 3, 4]).unwrap();
        assert!(!frame.is_extended());
        assert_eq!(frame.id(), Id::Standard(id));
        assert_eq!(frame.id_word(), 0x123 << 18);
        assert_eq!(frame.dlc(), 4);
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn extended_id_round_trip() {
        let id = ExtendedId::new(0x1234_5678).unwrap();
        let frame = Frame::new(id, &[]).unwrap();
        assert!(frame.is_extended());
        assert_eq!(frame.id(), Id::Extended(id));
        assert_eq!(frame.id_word(), 0x1234_5678 | XTD);
        assert_eq!(frame.data(), &[]);
    }

    #[test]
    fn payload_splits_into_register_words() {
        let id = StandardId::new(0x7FF).unwrap();
        let frame = Frame::new(id, &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]).unwrap();
        assert_eq!(frame.data_h(), 0x1122_3344);
        assert_eq!(frame.data_l(), 0x5566_7788);
        let back = Frame::from_raw(
            frame.id_word(),
            frame.cntrl_word(),
            frame.data_h(),
            frame.data_l(),
        );
        assert_eq!(back.data(), frame.data());
        assert_eq!(back.id(), frame.id());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let id = StandardId::new(1).unwrap();
        assert!(Frame::new(id, &[0; 9]).is_none());
        assert!(Frame::new_remote(id, 9).is_none());
    }

    #[test]
    fn remote_frames_carry_no_data() {
        let id = StandardId::new(0x22).unwrap();
        let frame = Frame::new_remote(id, 4).unwrap();
        assert!(frame.is_remote_frame());
        assert_eq!(frame.dlc(), 4);
        assert_eq!(frame.data(), &[]);
        assert_ne!(frame.id_word() & RTR, 0);
    }
}
