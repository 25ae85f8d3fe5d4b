//! The CMS/PDF signature builder.
//!
//! Implements the [`SignatureBackend`](crate::backend::SignatureBackend)
//! boundary: everything PDF- and ASN.1-shaped lives here, and the signing
//! core only ever reaches it through that trait.
//!
//! The backend produces one incremental update: the signature dictionary
//! with its byte range and contents placeholder, the signature field widget,
//! the updated page and catalog, the optional stamp appearance, and a
//! cross-reference section chaining to the previous one. The CMS blob inside
//! the placeholder is assembled in [`cms`], signed through the provider
//! callback, and optionally timestamped via [`tsa`].

mod backend;
mod byterange;
pub mod cms;
mod structure;
pub mod tsa;

pub use backend::IncrementalUpdateBackend;
pub use byterange::ByteRangeCalculator;
