use std::fmt;

/// Encoded size of [`StreamingControl`] (UVC 1.0 layout)
pub const STREAMING_CONTROL_SIZE: usize = 34;

/// Video probe and commit control
///
/// Multi-byte fields are little-endian on the wire, the struct is packed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamingControl {
    /// bmHint, which fields the host wants kept fixed
    pub hint: u16,
    /// 1-based index into the format descriptors
    pub format_index: u8,
    /// 1-based index into the frame descriptors of the format
    pub frame_index: u8,
    /// Frame interval in 100 ns units
    pub frame_interval: u32,
    pub key_frame_rate: u16,
    pub p_frame_rate: u16,
    pub comp_quality: u16,
    pub comp_window_size: u16,
    pub delay: u16,
    pub max_video_frame_size: u32,
    pub max_payload_transfer_size: u32,
    pub clock_frequency: u32,
    pub framing_info: u8,
    pub preferred_version: u8,
    pub min_version: u8,
    pub max_version: u8,
}

impl StreamingControl {
    /// Serializes the control into its wire representation
    pub fn to_bytes(&self) -> [u8; STREAMING_CONTROL_SIZE] {
        let mut buf = [0u8; STREAMING_CONTROL_SIZE];

        buf[0..2].copy_from_slice(&self.hint.to_le_bytes());
        buf[2] = self.format_index;
        buf[3] = self.frame_index;
        buf[4..8].copy_from_slice(&self.frame_interval.to_le_bytes());
        buf[8..10].copy_from_slice(&self.key_frame_rate.to_le_bytes());
        buf[10..12].copy_from_slice(&self.p_frame_rate.to_le_bytes());
        buf[12..14].copy_from_slice(&self.comp_quality.to_le_bytes());
        buf[14..16].copy_from_slice(&self.comp_window_size.to_le_bytes());
        buf[16..18].copy_from_slice(&self.delay.to_le_bytes());
        buf[18..22].copy_from_slice(&self.max_video_frame_size.to_le_bytes());
        buf[22..26].copy_from_slice(&self.max_payload_transfer_size.to_le_bytes());
        buf[26..30].copy_from_slice(&self.clock_frequency.to_le_bytes());
        buf[30] = self.framing_info;
        buf[31] = self.preferred_version;
        buf[32] = self.min_version;
        buf[33] = self.max_version;

        buf
    }

    /// Parses a control from the data phase of a SET_CUR request
    ///
    /// Hosts speaking UVC 1.0 may send fewer than 34 bytes, missing fields read as zero.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; STREAMING_CONTROL_SIZE];
        let len = bytes.len().min(STREAMING_CONTROL_SIZE);
        buf[..len].copy_from_slice(&bytes[..len]);

        let u16_at = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);
        let u32_at =
            |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        StreamingControl {
            hint: u16_at(0),
            format_index: buf[2],
            frame_index: buf[3],
            frame_interval: u32_at(4),
            key_frame_rate: u16_at(8),
            p_frame_rate: u16_at(10),
            comp_quality: u16_at(12),
            comp_window_size: u16_at(14),
            delay: u16_at(16),
            max_video_frame_size: u32_at(18),
            max_payload_transfer_size: u32_at(22),
            clock_frequency: u32_at(26),
            framing_info: buf[30],
            preferred_version: buf[31],
            min_version: buf[32],
            max_version: buf[33],
        }
    }
}

impl fmt::Display for StreamingControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "format {} frame {} interval {} max frame {} max payload {}",
            self.format_index,
            self.frame_index,
            self.frame_interval,
            self.max_video_frame_size,
            self.max_payload_transfer_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offsets() {
        let ctrl = StreamingControl {
            hint: 1,
            format_index: 1,
            frame_index: 2,
            frame_interval: 333_333,
            max_video_frame_size: 614_400,
            max_payload_transfer_size: 1024,
            framing_info: 3,
            preferred_version: 1,
            max_version: 1,
            ..Default::default()
        };
        let bytes = ctrl.to_bytes();

        assert_eq!(&bytes[0..4], &[0x01, 0x00, 0x01, 0x02]);
        assert_eq!(&bytes[4..8], &333_333u32.to_le_bytes());
        assert_eq!(&bytes[18..22], &614_400u32.to_le_bytes());
        assert_eq!(&bytes[22..26], &[0x00, 0x04, 0x00, 0x00]);
        assert_eq!(&bytes[30..34], &[3, 1, 0, 1]);
    }

    #[test]
    fn short_data_phase_reads_zero() {
        // UVC 1.0 hosts stop after dwMaxPayloadTransferSize
        let mut bytes = StreamingControl {
            format_index: 1,
            frame_index: 3,
            frame_interval: 666_666,
            clock_frequency: 48_000_000,
            ..Default::default()
        }
        .to_bytes()
        .to_vec();
        bytes.truncate(26);

        let ctrl = StreamingControl::from_bytes(&bytes);
        assert_eq!(ctrl.frame_index, 3);
        assert_eq!(ctrl.frame_interval, 666_666);
        assert_eq!(ctrl.clock_frequency, 0);
    }

    #[test]
    fn wire_form_is_stable() {
        let bytes: Vec<u8> = (0..STREAMING_CONTROL_SIZE as u8).collect();
        assert_eq!(StreamingControl::from_bytes(&bytes).to_bytes().to_vec(), bytes);
    }
}
