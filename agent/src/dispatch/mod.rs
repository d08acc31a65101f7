//! Remote command handling
//!
//! Commands arrive as MQTT messages, become [`envelope::CommandEnvelope`]s and are
//! answered with [`envelope::ResponseEnvelope`]s by the [`dispatcher::Dispatcher`].

pub mod dispatcher;
pub mod envelope;
pub mod state;
