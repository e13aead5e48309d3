//! Device drivers and simulated stand-ins for the gantry sensor array.
//!
//! Bus protocol decoding (BH1750, MLX90614, DHT22 frames) and the camera are
//! always built. Anything touching the Pi's GPIO/I2C controllers sits behind
//! the `hardware` feature.
pub mod bh1750;
pub mod camera;
pub mod dht22;
pub mod error;
pub mod mlx90614;
pub mod sim;
pub mod util;

#[cfg(feature = "hardware")]
pub mod gpio;

pub use bh1750::Bh1750;
pub use camera::CommandCamera;
pub use dht22::{Dht22, Dht22Channel, Dht22Port};
pub use error::HwError;
pub use mlx90614::{IrChannel, Mlx90614};
