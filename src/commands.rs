use std::fmt;

/// String commands accepted by `primary::matrixcmd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixCommand {
    ResetMatrix,
    ResetPorts,
    AllPorts(u8),
}

/// String commands accepted by `primary::presetcmd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetCommand {
    Save(u8),
    Recall(u8),
    Clear(u8),
}

/// A resolved, typed device operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    SetPower(bool),
    SetPanelLock(bool),
    SetIrOn(bool),
    Matrix(MatrixCommand),
    Preset(PresetCommand),
    SetPortSwitch { input: i64, output: u8 },
    SetPortPower { port: u8, on: bool },
    SetPortMirror { hdmi_port: u8, output_port: i64 },
    RemovePortMirror { hdmi_port: u8 },
    SetVolume { port: u8, level: f64 },
    SetVolumeMute { port: u8, mute: bool },
}

// Helper function to get the name of an Operation for logging
pub fn get_operation_name(operation: &Operation) -> &'static str {
    match operation {
        Operation::SetPower(_) => "setPower",
        Operation::SetPanelLock(_) => "setPanelLock",
        Operation::SetIrOn(_) => "setIrOn",
        Operation::Matrix(MatrixCommand::ResetMatrix) => "resetMatrix",
        Operation::Matrix(MatrixCommand::ResetPorts) => "resetAllPorts",
        Operation::Matrix(MatrixCommand::AllPorts(_)) => "setPortAll",
        Operation::Preset(PresetCommand::Save(_)) => "saveIoSettings",
        Operation::Preset(PresetCommand::Recall(_)) => "recallIoSettings",
        Operation::Preset(PresetCommand::Clear(_)) => "clearIoSettings",
        Operation::SetPortSwitch { .. } => "setPortSwitch",
        Operation::SetPortPower { .. } => "setPortPower",
        Operation::SetPortMirror { .. } => "setPortMirror",
        Operation::RemovePortMirror { .. } => "removePortMirror",
        Operation::SetVolume { .. } => "setVolume",
        Operation::SetVolumeMute { .. } => "setVolumeMute",
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", get_operation_name(self))
    }
}
