//! Decoding of MIDI control messages addressed to the model
//!
//! The ingestion thread forwards every controller and program change as
//! three bytes. Interface elements are switched with controller 98 in two
//! steps: a selector value `0b01mm_0ggg` picks group `ggg` and mode `mm`,
//! then values below 32 apply that mode to element `value`.

/// Controller selecting and switching interface elements
pub const CC_IFELM_CONTROL: u8 = 98;

/// Controller for "all notes off"
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// What a selector value asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfelmMode {
    /// Clear the whole group immediately
    ClearGroup,
    /// Reserved selector; later element values are ignored
    Inactive,
    Clear,
    Set,
}

impl IfelmMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => IfelmMode::ClearGroup,
            2 => IfelmMode::Clear,
            3 => IfelmMode::Set,
            _ => IfelmMode::Inactive,
        }
    }
}

/// One decoded control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    SelectIfelmMode { group: u8, mode: IfelmMode },
    Ifelm { index: u8 },
    AllNotesOff { channel: u8 },
    ProgramChange { channel: u8, program: u8 },
    Other { status: u8, data1: u8, data2: u8 },
}

pub fn decode(bytes: [u8; 3]) -> ControlMessage {
    let [status, data1, data2] = bytes;
    let channel = status & 0x0F;
    match (status & 0xF0, data1) {
        (0xB0, CC_IFELM_CONTROL) if data2 & 0xC0 == 0x40 => ControlMessage::SelectIfelmMode {
            group: data2 & 0x07,
            mode: IfelmMode::from_bits(data2 >> 4),
        },
        (0xB0, CC_IFELM_CONTROL) if data2 < 32 => ControlMessage::Ifelm { index: data2 },
        (0xB0, CC_ALL_NOTES_OFF) => ControlMessage::AllNotesOff { channel },
        (0xC0, program) => ControlMessage::ProgramChange { channel, program },
        _ => ControlMessage::Other {
            status,
            data1,
            data2,
        },
    }
}

/// Selector state kept between controller 98 messages
#[derive(Debug, Default, Clone, Copy)]
pub struct IfelmSelector {
    current: Option<(u8, IfelmMode)>,
}

impl IfelmSelector {
    pub fn select(&mut self, group: u8, mode: IfelmMode) {
        self.current = Some((group, mode));
    }

    /// Group and on/off state that element values currently apply, if a
    /// set or clear mode is selected
    pub fn target(&self) -> Option<(u8, bool)> {
        match self.current? {
            (group, IfelmMode::Set) => Some((group, true)),
            (group, IfelmMode::Clear) => Some((group, false)),
            _ => None,
        }
    }
}
