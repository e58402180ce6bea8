//! CFDI 3.3 XML serialization and parsing.
//!
//! Known elements are matched by local name, so documents using a prefix
//! other than `cfdi` still parse. Output always uses `cfdi:` and `tfd:`.
//! `from_xml(&to_xml(d)?)? == d` holds for every document.

mod cfdi;
mod parse;
mod writer;

pub use cfdi::{to_xml, to_xml_bytes};
pub use parse::{from_xml, from_xml_bytes};

/// Namespace of `cfdi:Comprobante` 3.3.
pub const CFDI_NS: &str = "http://www.sat.gob.mx/cfd/3";
pub const CFDI_SCHEMA_LOCATION: &str =
    "http://www.sat.gob.mx/cfd/3 http://www.sat.gob.mx/sitio_internet/cfd/3/cfdv33.xsd";
/// Namespace of the `tfd:TimbreFiscalDigital` 1.1 complement.
pub const TFD_NS: &str = "http://www.sat.gob.mx/TimbreFiscalDigital";
pub const TFD_SCHEMA_LOCATION: &str = "http://www.sat.gob.mx/TimbreFiscalDigital http://www.sat.gob.mx/sitio_internet/cfd/TimbreFiscalDigital/TimbreFiscalDigitalv11.xsd";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
