//! Types crossing the boundary to the embedding UI layer.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them verbatim over whatever event bus it uses (camelCase JSON).

pub mod events;
