// Privacy layer
//
// Circuit construction on the proxy side and the onion codec shared by
// proxies and relays.

pub mod circuit;
pub mod onion;

pub use circuit::{Circuit, CircuitBuilder, CircuitError, CircuitHop, CircuitId};
pub use onion::{decrypt_one_layer, encrypt, LayerRoute, OnionError, OnionLayer, IV_SIZE};
