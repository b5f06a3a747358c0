//! A BUFR/CREX Data Descriptor Section interpreter: walks a sequence of
//! Table B/C/D descriptors against a caller-supplied table set, producing
//! or consuming decoded values for either wire format.
//!
//! Table loading, caching and on-disk search are out of scope; callers
//! implement [`tableset::TableSet`] against their own copy of the WMO
//! tables.

pub mod bits;
pub mod bufr_wire;
pub mod bulletin;
pub mod compressed;
pub mod crex_codec;
pub mod crex_wire;
pub mod decode;
pub mod diff;
pub mod encode;
pub mod error;
pub mod handler;
pub mod interp;
pub mod options;
pub mod state;
pub mod subset;
pub mod tableset;
pub mod text;
pub mod var;
pub mod varcode;
pub mod varinfo;

pub use self::bufr_wire::{decode_bufr, decode_bufr_header, encode_bufr};
pub use self::bulletin::{Bulletin, Header, ReferenceDateTime, SectionThreeFlags};
pub use self::crex_wire::{decode_crex, encode_crex};
pub use self::diff::diff;
pub use self::error::{Error, ErrorLocation, Result};
pub use self::handler::{AssociatedField, Handler, VisitCtx};
pub use self::interp::DDSInterpreter;
pub use self::options::{DecodeOptions, EncodeOptions, MasterTableVersionOverride};
pub use self::state::InterpreterState;
pub use self::subset::Subset;
pub use self::tableset::{AlterationCache, StaticTableSet, TableSet};
pub use self::var::{DomainPolicy, Value, Var};
pub use self::varcode::{Category, Varcode};
pub use self::varinfo::{VarType, Varinfo, VarinfoData};
