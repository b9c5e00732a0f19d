pub mod events;
pub mod extensions;
pub mod legacy;
pub mod net;
pub mod pool;
pub mod timers;
