#![no_main]

use libfuzzer_sys::fuzz_target;
use skiff::{Ast, Reader};

// Arbitrary text fed in arbitrary chunks must never panic the reader, and
// every expression it produces must render back into text it accepts again.
fuzz_target!(|chunks: Vec<String>| {
    let mut ast = Ast::new();
    let mut reader = Reader::new();

    for chunk in chunks {
        if reader.feed(&chunk).is_err() {
            reader.clear();
            continue;
        }

        loop {
            match reader.read(&mut ast) {
                Ok(Some(root)) => {
                    let rendered = ast.render(root);
                    assert!(skiff::parse(&rendered).is_ok(), "{} did not read back", rendered);
                }
                Ok(None) => break,
                Err(_) => {
                    reader.clear();
                    break;
                }
            }
        }
    }
});
