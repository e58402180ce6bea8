#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Anything that parses must serialize and parse back to the same document.
        if let Ok(doc) = cfdi::xml::from_xml(s) {
            let xml = cfdi::xml::to_xml(&doc).expect("parsed document must serialize");
            let again = cfdi::xml::from_xml(&xml).expect("serialized document must parse");
            assert_eq!(again, doc);
        }
    }
});
