#![no_main]

use airtrack_core::export::to_value;
use airtrack_core::import::from_json_str;
use airtrack_core::{ElementStore, FieldRegistry, register_builtin_fields};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 65_536 {
        return;
    }
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let mut registry = FieldRegistry::new();
    if register_builtin_fields(&mut registry).is_err() {
        return;
    }
    let mut store = ElementStore::new();

    match from_json_str(&registry, &mut store, text, None) {
        Ok(root) => {
            assert!(store.check_invariants().is_ok());
            assert!(to_value(&registry, &store, root).is_ok());
            assert!(store.destroy(root).is_ok());
            assert!(store.is_empty());
        }
        // a failed import leaves nothing behind
        Err(_) => assert!(store.is_empty()),
    }
});
