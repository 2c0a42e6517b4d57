#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Velocity;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Orientation;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelBias;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GyroBias;
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contacts;
