#![no_main]

use airtrack_core::{ElementId, ElementStore, ElementType, FieldId, MacAddr};
use libfuzzer_sys::fuzz_target;

const CONTAINERS: [ElementType; 4] = [
    ElementType::Vector,
    ElementType::Map,
    ElementType::IntMap,
    ElementType::MacMap,
];

fn pick(handles: &[ElementId], raw: u8) -> Option<ElementId> {
    if handles.is_empty() {
        None
    } else {
        Some(handles[usize::from(raw) % handles.len()])
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() > 16_384 {
        return;
    }

    let mut store = ElementStore::new();
    let mut handles: Vec<ElementId> = Vec::new();

    for chunk in data.chunks(4) {
        let [op_tag, a, b, key] = match chunk {
            [w, x, y, z] => [*w, *x, *y, *z],
            _ => break,
        };

        match op_tag % 9 {
            0 => {
                let field = FieldId::new(u32::from(a));
                handles.push(store.alloc_scalar(i64::from(key), Some(field)));
            }
            1 => handles.push(store.alloc_empty(CONTAINERS[usize::from(a % 4)], None)),
            2 => {
                if let (Some(p), Some(c)) = (pick(&handles, a), pick(&handles, b)) {
                    let _ = store.push(p, c);
                }
            }
            3 => {
                if let (Some(p), Some(c)) = (pick(&handles, a), pick(&handles, b)) {
                    let _ = store.map_insert_at(p, FieldId::new(u32::from(key % 8)), c);
                }
            }
            4 => {
                if let (Some(p), Some(c)) = (pick(&handles, a), pick(&handles, b)) {
                    let _ = store.int_map_insert(p, i64::from(key % 8), c);
                }
            }
            5 => {
                if let (Some(p), Some(c)) = (pick(&handles, a), pick(&handles, b)) {
                    let _ = store.mac_map_insert(p, MacAddr::new([2, 0, 0, 0, 0, key % 4]), c);
                }
            }
            6 => {
                if let Some(p) = pick(&handles, a) {
                    let _ = store.remove_index(p, usize::from(key % 8));
                }
            }
            7 => {
                if let Some(p) = pick(&handles, a) {
                    let _ = store.clear(p);
                }
            }
            _ => {
                if let Some(t) = pick(&handles, a) {
                    let _ = store.destroy(t);
                }
            }
        }

        assert!(store.check_invariants().is_ok());
    }

    let roots: Vec<_> = store
        .ids()
        .filter(|&id| store.refcount(id).is_ok_and(|n| n == 0))
        .collect();
    for root in roots {
        let _ = store.destroy(root);
    }
    assert!(store.is_empty());
});
