//! comm: wire codec and datagram transports.

pub mod codec;
pub mod transport;

pub use codec::{
    encode_command, encode_data, join_data, parse_strict, split_data, unzip_items, zip_items,
    Strip, DEFAULT_BUFSIZE,
};
pub use transport::{resolve, ChannelTransport, Transport, UdpTransport};
