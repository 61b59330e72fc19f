//! Packets exchanged between camera nodes and the server.
//!
//! Every packet travels as a structured record (a JSON object) carrying a
//! `_pktype` discriminator next to the packet's own fields. Framing the
//! records on a byte stream is the transport's job; this module only
//! defines the field sets, the discriminators, and routing.
//!
//! Each direction is one internally tagged enum:
//!
//! | Discriminator | Enum              | Packet                   |
//! |---------------|-------------------|--------------------------|
//! | `svconf`      | [`ServerPacket`]  | [`ConfigurationReport`]  |
//! | `svdata`      | [`ServerPacket`]  | [`DataPacket`]           |
//! | `clconf`      | [`NodePacket`]    | [`ConfigurationPacket`]  |
//! | `cldata`      | [`NodePacket`]    | [`NeighbourDataPacket`]  |

use activity_control::ParameterSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::image_proc::ImageType;

/// Name of the discriminator field in every record
pub const PACKET_TYPE_FIELD: &str = "_pktype";

/// Discriminator values
pub mod packet_type {
    pub const SERVER_CONFIGURATION: &str = "svconf";
    pub const SERVER_DATA: &str = "svdata";
    pub const CLIENT_CONFIGURATION: &str = "clconf";
    pub const CLIENT_DATA: &str = "cldata";
}

/// Node identifier, unique within one camera network
pub type NodeId = u32;

/// Errors raised while encoding or routing packets
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Packet has no `{PACKET_TYPE_FIELD}` discriminator")]
    MissingPacketType,

    #[error("Packet of unsupported type received: {0}")]
    UnsupportedPacketType(String),

    #[error("Malformed {packet_type} packet: {source}")]
    MalformedPacket {
        packet_type: String,
        source: serde_json::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// The packets travelling in one direction, as a tagged union.
pub trait PacketSet: Serialize + DeserializeOwned {
    /// Discriminators this direction accepts
    const PACKET_TYPES: [&'static str; 2];

    fn packet_type(&self) -> &'static str;
}

/// Configuration pushed by the server.
///
/// Always carries both parameter sets and the threshold; the remaining
/// fields are optional overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationPacket {
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub software_version: String,
    #[serde(default)]
    pub send_image: Option<bool>,
    #[serde(default)]
    pub image_type: Option<ImageType>,
    pub parameters_below_threshold: ParameterSet,
    pub parameters_above_threshold: ParameterSet,
    #[serde(alias = "activation_level_threshold")]
    pub activation_threshold: f64,
    /// Allow the node to derive its id from the host name when `node_id` is absent
    #[serde(default = "default_hostname_based_ids")]
    pub hostname_based_ids: bool,
}

fn default_hostname_based_ids() -> bool {
    true
}

/// Activation of neighbouring nodes, forwarded by the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeighbourDataPacket {
    pub activation_neighbours: f64,
}

/// Acknowledges a configuration and announces the node's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationReport {
    pub node_id: NodeId,
    pub software_version: String,
}

/// Per-tick measurement sent by a node.
///
/// `gain` and `sample_time` are those of the regime selected by this
/// tick's update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    pub white_pixels: f64,
    pub activation_level: f64,
    pub gain: f64,
    pub sample_time: f64,
    /// JPEG bytes, base64 encoded on the wire
    #[serde(default, with = "image_payload")]
    pub image: Option<Vec<u8>>,
}

mod image_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(image: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match image {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Node to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_pktype")]
pub enum ServerPacket {
    #[serde(rename = "svconf")]
    Configuration(ConfigurationReport),
    #[serde(rename = "svdata")]
    Data(DataPacket),
}

impl PacketSet for ServerPacket {
    const PACKET_TYPES: [&'static str; 2] = [packet_type::SERVER_CONFIGURATION, packet_type::SERVER_DATA];

    fn packet_type(&self) -> &'static str {
        match self {
            Self::Configuration(_) => packet_type::SERVER_CONFIGURATION,
            Self::Data(_) => packet_type::SERVER_DATA,
        }
    }
}

impl From<ConfigurationReport> for ServerPacket {
    fn from(packet: ConfigurationReport) -> Self {
        Self::Configuration(packet)
    }
}

impl From<DataPacket> for ServerPacket {
    fn from(packet: DataPacket) -> Self {
        Self::Data(packet)
    }
}

/// Server to node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_pktype")]
pub enum NodePacket {
    #[serde(rename = "clconf")]
    Configuration(ConfigurationPacket),
    #[serde(rename = "cldata")]
    Data(NeighbourDataPacket),
}

impl PacketSet for NodePacket {
    const PACKET_TYPES: [&'static str; 2] = [packet_type::CLIENT_CONFIGURATION, packet_type::CLIENT_DATA];

    fn packet_type(&self) -> &'static str {
        match self {
            Self::Configuration(_) => packet_type::CLIENT_CONFIGURATION,
            Self::Data(_) => packet_type::CLIENT_DATA,
        }
    }
}

impl From<ConfigurationPacket> for NodePacket {
    fn from(packet: ConfigurationPacket) -> Self {
        Self::Configuration(packet)
    }
}

impl From<NeighbourDataPacket> for NodePacket {
    fn from(packet: NeighbourDataPacket) -> Self {
        Self::Data(packet)
    }
}

/// Serialize a packet into a tagged record.
pub fn encode<P: PacketSet>(packet: &P) -> ProtocolResult<Value> {
    Ok(serde_json::to_value(packet)?)
}

/// Discriminator of a record, if it has one
pub fn packet_type_of(record: &Value) -> Option<&str> {
    record.get(PACKET_TYPE_FIELD).and_then(Value::as_str)
}

/// Receiver side of one link direction.
///
/// The associated packet set fixes which discriminators the handler
/// accepts: a node handles [`NodePacket`], a server [`ServerPacket`].
pub trait PacketHandler {
    type Packet: PacketSet;

    fn handle(&mut self, packet: Self::Packet);
}

/// Decode a record into one packet of the handler's direction and hand it over.
///
/// The record is fully decoded before the handler runs, so on any error
/// the handler is not called at all.
pub fn route<H: PacketHandler>(record: Value, handler: &mut H) -> ProtocolResult<()> {
    let packet_type = packet_type_of(&record)
        .ok_or(ProtocolError::MissingPacketType)?
        .to_string();
    if !H::Packet::PACKET_TYPES.contains(&packet_type.as_str()) {
        return Err(ProtocolError::UnsupportedPacketType(packet_type));
    }

    let packet = serde_json::from_value(record).map_err(|source| ProtocolError::MalformedPacket {
        packet_type,
        source,
    })?;
    handler.handle(packet);
    Ok(())
}
