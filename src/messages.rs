/// Occupancy as last published on the state topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Occupancy {
    #[default]
    Idle,
    Occupied,
}

impl Occupancy {
    pub fn payload(self) -> &'static str {
        match self {
            Occupancy::Occupied => "ON",
            Occupancy::Idle => "OFF",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn payload(self) -> &'static str {
        match self {
            Availability::Online => "online",
            Availability::Offline => "offline",
        }
    }
}

/// Power state reported by the display, never cached by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayPower {
    On,
    Off,
}
