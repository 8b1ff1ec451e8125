pub mod conflict;
pub mod directory;
pub mod lifecycle;
pub mod slots;
