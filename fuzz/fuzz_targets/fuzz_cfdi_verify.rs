#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parse, rebuild the cadena and check the embedded certificate. Must not panic.
    if let Ok(doc) = cfdi::xml::from_xml_bytes(data) {
        let _ = cfdi::cadena::CadenaOriginal::of_sealed(&doc);
        let _ = cfdi::sello::verify_embedded(&doc);
    }
});
