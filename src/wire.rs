//! Cluster wire format.
//!
//! Every packet starts with a fixed 20-byte header; `get_data_rsp` carries a
//! 4-byte sensor payload and `set_data` a 64-byte display payload right after
//! it. All multi-byte integers are network byte order and the layout is
//! bit-exact, so encoding and decoding work over plain byte slices with no
//! structure overlays and no allocation.

use std::fmt;

// =============================================================================
// FIXED SIZES
// =============================================================================

/// Packet header: operation u16 + mode u16 + 16-byte block identifier.
pub const HEADER_LEN: usize = 20;

/// Sensor payload: temperature i16 + brightness u16.
pub const SENSOR_LEN: usize = 4;

/// Display text capacity, trailing NUL included.
pub const DISPLAY_TEXT_LEN: usize = 45;

/// Rendered temperature capacity: `[+/-]TT °C` plus trailing NUL.
pub const DISPLAY_TEMPERATURE_LEN: usize = 8;

/// Rendered time capacity: `HH:MM:SS` plus trailing NUL.
pub const DISPLAY_TIME_LEN: usize = 9;

/// Display payload: brightness u16 followed by the three string fields.
pub const DISPLAY_LEN: usize =
    2 + DISPLAY_TEXT_LEN + DISPLAY_TEMPERATURE_LEN + DISPLAY_TIME_LEN;

/// Largest datagram on the wire (`set_data`); also the receive slot size.
pub const MAX_PACKET_LEN: usize = HEADER_LEN + DISPLAY_LEN;

/// Exact length of a `get_data_rsp` datagram.
pub const SENSOR_PACKET_LEN: usize = HEADER_LEN + SENSOR_LEN;

const _: () = assert!(HEADER_LEN == 20);
const _: () = assert!(SENSOR_LEN == 4);
const _: () = assert!(DISPLAY_LEN == 64);
const _: () = assert!(MAX_PACKET_LEN == 84);

const OP_OFFSET: usize = 0;
const MODE_OFFSET: usize = 2;
const ID_OFFSET: usize = 4;

// =============================================================================
// HEADER FIELDS
// =============================================================================

/// Packet operation codes, in wire order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    MasterNeededReq = 0,
    IAmMasterRsp = 1,
    SlaveNeededReq = 2,
    IAmSlaveRsp = 3,
    GetDataReq = 4,
    GetDataRsp = 5,
    SetData = 6,
}

/// Number of known opcodes; anything at or above is rejected.
pub const OPCODE_COUNT: usize = 7;

impl Opcode {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Opcode::MasterNeededReq),
            1 => Some(Opcode::IAmMasterRsp),
            2 => Some(Opcode::SlaveNeededReq),
            3 => Some(Opcode::IAmSlaveRsp),
            4 => Some(Opcode::GetDataReq),
            5 => Some(Opcode::GetDataRsp),
            6 => Some(Opcode::SetData),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::MasterNeededReq => "master_needed_req",
            Opcode::IAmMasterRsp => "i_am_master_rsp",
            Opcode::SlaveNeededReq => "slave_needed_req",
            Opcode::IAmSlaveRsp => "i_am_slave_rsp",
            Opcode::GetDataReq => "get_data_req",
            Opcode::GetDataRsp => "get_data_rsp",
            Opcode::SetData => "set_data",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-asserted role a node publishes in every packet it sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Mode {
    Master = 0,
    Slave = 1,
    TmpMaster = 2,
}

impl Mode {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Mode::Master),
            1 => Some(Mode::Slave),
            2 => Some(Mode::TmpMaster),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Master => "master",
            Mode::Slave => "slave",
            Mode::TmpMaster => "tmp_master",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Random 128-bit node identifier, fixed for the process lifetime.
///
/// Ordering is lexicographic over the raw bytes; elections break ties by
/// picking the greatest identifier. The all-zero value is reserved for
/// "no known master".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId([u8; 16]);

impl BlockId {
    pub const LEN: usize = 16;

    /// Draw a fresh uniformly random identifier.
    pub fn generate() -> Self {
        BlockId(rand::random())
    }

    /// The reserved "no known master" value.
    pub fn nil() -> Self {
        BlockId([0; 16])
    }

    pub fn is_nil(self) -> bool {
        self.0 == [0; 16]
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        BlockId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// One environmental reading, as carried by `get_data_rsp`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SensorData {
    /// Degrees Celsius.
    pub temperature: i16,
    /// Ambient brightness, lux.
    pub brightness: u16,
}

impl SensorData {
    /// Write the payload right after the header. `buf` must hold at least
    /// [`SENSOR_PACKET_LEN`] bytes.
    pub fn encode(&self, buf: &mut [u8]) {
        buf[HEADER_LEN..HEADER_LEN + 2].copy_from_slice(&self.temperature.to_be_bytes());
        buf[HEADER_LEN + 2..HEADER_LEN + 4].copy_from_slice(&self.brightness.to_be_bytes());
    }

    /// Read the payload of a validated `get_data_rsp` datagram.
    pub fn decode(buf: &[u8]) -> Self {
        SensorData {
            temperature: i16::from_be_bytes([buf[HEADER_LEN], buf[HEADER_LEN + 1]]),
            brightness: u16::from_be_bytes([buf[HEADER_LEN + 2], buf[HEADER_LEN + 3]]),
        }
    }
}

/// The payload a master pushes to every display, as carried by `set_data`.
///
/// The string fields are NUL-terminated ASCII in fixed capacities; unused
/// tail bytes stay zero and travel verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayData {
    /// Averaged brightness, host byte order (swapped on the wire).
    pub brightness: u16,
    pub text: [u8; DISPLAY_TEXT_LEN],
    pub temperature: [u8; DISPLAY_TEMPERATURE_LEN],
    pub time: [u8; DISPLAY_TIME_LEN],
}

impl Default for DisplayData {
    fn default() -> Self {
        DisplayData {
            brightness: 0,
            text: [0; DISPLAY_TEXT_LEN],
            temperature: [0; DISPLAY_TEMPERATURE_LEN],
            time: [0; DISPLAY_TIME_LEN],
        }
    }
}

impl DisplayData {
    /// Write the payload right after the header. `buf` must hold at least
    /// [`MAX_PACKET_LEN`] bytes.
    pub fn encode(&self, buf: &mut [u8]) {
        let mut at = HEADER_LEN;
        buf[at..at + 2].copy_from_slice(&self.brightness.to_be_bytes());
        at += 2;
        buf[at..at + DISPLAY_TEXT_LEN].copy_from_slice(&self.text);
        at += DISPLAY_TEXT_LEN;
        buf[at..at + DISPLAY_TEMPERATURE_LEN].copy_from_slice(&self.temperature);
        at += DISPLAY_TEMPERATURE_LEN;
        buf[at..at + DISPLAY_TIME_LEN].copy_from_slice(&self.time);
    }

    /// Read the payload of a validated `set_data` datagram.
    pub fn decode(buf: &[u8]) -> Self {
        let mut data = DisplayData::default();
        let mut at = HEADER_LEN;
        data.brightness = u16::from_be_bytes([buf[at], buf[at + 1]]);
        at += 2;
        data.text.copy_from_slice(&buf[at..at + DISPLAY_TEXT_LEN]);
        at += DISPLAY_TEXT_LEN;
        data.temperature.copy_from_slice(&buf[at..at + DISPLAY_TEMPERATURE_LEN]);
        at += DISPLAY_TEMPERATURE_LEN;
        data.time.copy_from_slice(&buf[at..at + DISPLAY_TIME_LEN]);
        data
    }
}

// =============================================================================
// HEADER CODEC
// =============================================================================

/// Write the 20-byte header. `buf` must hold at least [`HEADER_LEN`] bytes.
pub fn encode_header(buf: &mut [u8], op: Opcode, mode: Mode, id: BlockId) {
    buf[OP_OFFSET..OP_OFFSET + 2].copy_from_slice(&(op as u16).to_be_bytes());
    buf[MODE_OFFSET..MODE_OFFSET + 2].copy_from_slice(&(mode as u16).to_be_bytes());
    buf[ID_OFFSET..ID_OFFSET + BlockId::LEN].copy_from_slice(id.as_bytes());
}

/// Operation field of a buffer of at least [`HEADER_LEN`] bytes.
pub fn decode_op(buf: &[u8]) -> Option<Opcode> {
    Opcode::from_u16(u16::from_be_bytes([buf[OP_OFFSET], buf[OP_OFFSET + 1]]))
}

/// Mode field of a buffer of at least [`HEADER_LEN`] bytes.
pub fn decode_mode(buf: &[u8]) -> Option<Mode> {
    Mode::from_u16(u16::from_be_bytes([buf[MODE_OFFSET], buf[MODE_OFFSET + 1]]))
}

/// Sender identifier of a buffer of at least [`HEADER_LEN`] bytes.
pub fn decode_id(buf: &[u8]) -> BlockId {
    let mut id = [0; 16];
    id.copy_from_slice(&buf[ID_OFFSET..ID_OFFSET + BlockId::LEN]);
    BlockId::from_bytes(id)
}

/// Accept a datagram iff its size, opcode and mode are coherent.
///
/// Header-only operations tolerate trailing bytes up to the maximum packet
/// size; the two payload-carrying operations must match their exact length.
pub fn validate(buf: &[u8]) -> bool {
    if buf.len() < HEADER_LEN || buf.len() > MAX_PACKET_LEN {
        return false;
    }

    let Some(op) = decode_op(buf) else {
        return false;
    };

    if op == Opcode::GetDataRsp && buf.len() != SENSOR_PACKET_LEN {
        return false;
    }

    if op == Opcode::SetData && buf.len() != MAX_PACKET_LEN {
        return false;
    }

    decode_mode(buf).is_some()
}

// =============================================================================
// OUTBOUND FRAMES
// =============================================================================

/// A fully encoded datagram ready for transmission.
#[derive(Clone, Copy)]
pub struct Frame {
    buf: [u8; MAX_PACKET_LEN],
    len: usize,
}

impl Frame {
    /// Header-only frame (requests, confirmations, announcements).
    pub fn header_only(op: Opcode, mode: Mode, id: BlockId) -> Self {
        let mut buf = [0; MAX_PACKET_LEN];
        encode_header(&mut buf, op, mode, id);
        Frame { buf, len: HEADER_LEN }
    }

    /// `get_data_rsp` frame carrying one sensor reading.
    pub fn with_sensor(op: Opcode, mode: Mode, id: BlockId, data: &SensorData) -> Self {
        let mut buf = [0; MAX_PACKET_LEN];
        encode_header(&mut buf, op, mode, id);
        data.encode(&mut buf);
        Frame { buf, len: SENSOR_PACKET_LEN }
    }

    /// `set_data` frame carrying the display payload.
    pub fn with_display(op: Opcode, mode: Mode, id: BlockId, data: &DisplayData) -> Self {
        let mut buf = [0; MAX_PACKET_LEN];
        encode_header(&mut buf, op, mode, id);
        data.encode(&mut buf);
        Frame { buf, len: MAX_PACKET_LEN }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(last: u8) -> BlockId {
        let mut bytes = [0u8; 16];
        bytes[15] = last;
        BlockId::from_bytes(bytes)
    }

    #[test]
    fn header_round_trip() {
        for op in [
            Opcode::MasterNeededReq,
            Opcode::IAmMasterRsp,
            Opcode::SlaveNeededReq,
            Opcode::IAmSlaveRsp,
            Opcode::GetDataReq,
        ] {
            for mode in [Mode::Master, Mode::Slave, Mode::TmpMaster] {
                let frame = Frame::header_only(op, mode, id(7));
                let buf = frame.bytes();
                assert_eq!(buf.len(), HEADER_LEN);
                assert_eq!(decode_op(buf), Some(op));
                assert_eq!(decode_mode(buf), Some(mode));
                assert_eq!(decode_id(buf), id(7));
                assert!(validate(buf));
            }
        }
    }

    #[test]
    fn header_is_network_byte_order() {
        let frame = Frame::header_only(Opcode::SetData, Mode::TmpMaster, id(1));
        let buf = frame.bytes();
        assert_eq!(&buf[..4], &[0, 6, 0, 2]);
    }

    #[test]
    fn sensor_round_trip() {
        let data = SensorData { temperature: -45, brightness: 550 };
        let frame = Frame::with_sensor(Opcode::GetDataRsp, Mode::Slave, id(3), &data);
        let buf = frame.bytes();
        assert_eq!(buf.len(), SENSOR_PACKET_LEN);
        assert!(validate(buf));
        assert_eq!(SensorData::decode(buf), data);
    }

    #[test]
    fn display_round_trip() {
        let mut data = DisplayData::default();
        data.brightness = 412;
        data.text[..5].copy_from_slice(b"hello");
        data.temperature[..3].copy_from_slice(b"+21");
        data.time[..8].copy_from_slice(b"12:34:56");

        let frame = Frame::with_display(Opcode::SetData, Mode::Master, id(9), &data);
        let buf = frame.bytes();
        assert_eq!(buf.len(), MAX_PACKET_LEN);
        assert!(validate(buf));
        assert_eq!(DisplayData::decode(buf), data);

        // Brightness is byte-swapped on the wire, strings travel verbatim.
        assert_eq!(&buf[HEADER_LEN..HEADER_LEN + 2], &412u16.to_be_bytes());
        assert_eq!(&buf[HEADER_LEN + 2..HEADER_LEN + 7], b"hello");
    }

    #[test]
    fn validator_rejects_bad_sizes() {
        let frame = Frame::header_only(Opcode::MasterNeededReq, Mode::Slave, id(1));
        let mut long = [0u8; MAX_PACKET_LEN + 1];
        long[..HEADER_LEN].copy_from_slice(frame.bytes());

        assert!(!validate(&frame.bytes()[..HEADER_LEN - 1]));
        assert!(!validate(&long));
        assert!(!validate(&[]));
    }

    #[test]
    fn validator_rejects_unknown_fields() {
        let mut buf = [0u8; HEADER_LEN];
        encode_header(&mut buf, Opcode::MasterNeededReq, Mode::Slave, id(1));

        buf[1] = 7; // operation past the known range
        assert!(!validate(&buf));

        buf[1] = 0;
        buf[3] = 3; // mode past tmp_master
        assert!(!validate(&buf));
    }

    #[test]
    fn validator_pins_payload_lengths() {
        let mut buf = [0u8; MAX_PACKET_LEN];
        encode_header(&mut buf, Opcode::GetDataRsp, Mode::Slave, id(1));
        assert!(validate(&buf[..SENSOR_PACKET_LEN]));
        assert!(!validate(&buf[..HEADER_LEN]));
        assert!(!validate(&buf[..SENSOR_PACKET_LEN + 1]));

        encode_header(&mut buf, Opcode::SetData, Mode::Master, id(1));
        assert!(validate(&buf));
        assert!(!validate(&buf[..MAX_PACKET_LEN - 1]));
    }

    #[test]
    fn header_only_ops_tolerate_trailing_bytes() {
        let mut buf = [0u8; 40];
        encode_header(&mut buf, Opcode::GetDataReq, Mode::Master, id(1));
        assert!(validate(&buf));
    }

    #[test]
    fn block_id_ordering_is_lexicographic() {
        let low = BlockId::from_bytes([0x01; 16]);
        let mut high_bytes = [0x01; 16];
        high_bytes[0] = 0x02;
        let high = BlockId::from_bytes(high_bytes);
        assert!(high > low);
        assert!(BlockId::nil() < low);
        assert!(BlockId::nil().is_nil());
        assert!(!low.is_nil());
    }
}
