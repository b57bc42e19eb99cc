use serde::Deserialize;

/// Last known state of a switch entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
    #[default]
    Unknown,
}

impl SwitchState {
    pub fn from_on(on: bool) -> Self {
        if on { SwitchState::On } else { SwitchState::Off }
    }
}
