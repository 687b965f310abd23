use patscan_core::{
    AddressKind, AddressSpec, SignatureDef, SignatureSet, SliceMemory, load_signatures,
    save_signatures,
};

const BASE: u64 = 0x1_4000_0000;

/// A small code image:
///
/// ```text
/// 0x00  call stub            E8 rel32 -> 0x20
/// 0x10  mov rax, [rip+..]    48 8B 05 rel32 -> slot at 0x30
/// 0x20  stub: jmp rel32      E9 rel32 -> 0x40
/// 0x30  slot                 u64
/// ```
fn image() -> Vec<u8> {
    let mut image = vec![0xCC; 0x48];
    image[0x00] = 0xE8;
    image[0x01..0x05].copy_from_slice(&(0x20i32 - 0x05).to_le_bytes());
    image[0x10..0x13].copy_from_slice(&[0x48, 0x8B, 0x05]);
    image[0x13..0x17].copy_from_slice(&(0x30i32 - 0x17).to_le_bytes());
    image[0x20] = 0xE9;
    image[0x21..0x25].copy_from_slice(&(0x40i32 - 0x25).to_le_bytes());
    image[0x30..0x38].copy_from_slice(&0xDEAD_BEEFu64.to_le_bytes());
    image
}

fn signatures() -> SignatureSet {
    SignatureSet {
        version: "image-v1".to_string(),
        entries: vec![
            SignatureDef {
                name: "Handler".to_string(),
                pattern: "E8 @@ @@ @@ @@".to_string(),
                address: Some(AddressSpec {
                    kind: AddressKind::REL32.precode(),
                    relative_to: 5,
                }),
                must_match_at_start: true,
                addend: 0,
            },
            SignatureDef {
                name: "Global".to_string(),
                pattern: "48 8B 05 @@ @@ @@ @@".to_string(),
                address: Some(AddressSpec {
                    kind: AddressKind::REL32.indirect(),
                    relative_to: 7,
                }),
                must_match_at_start: false,
                addend: -0xEF,
            },
            SignatureDef {
                name: "StubStart".to_string(),
                pattern: "CC * E9".to_string(),
                address: None,
                must_match_at_start: false,
                addend: 0,
            },
        ],
    }
}

#[test]
fn scan_resolves_precode_and_indirect_addresses() {
    let image = image();
    let memory = SliceMemory::new(&image, BASE);
    let compiled = signatures().compile().unwrap();
    let hits = compiled.scan(&image, BASE, &memory);

    assert_eq!(hits.len(), 3);

    assert_eq!(hits[0].name, "Handler");
    assert_eq!(hits[0].offset, 0);
    assert_eq!(hits[0].address, Some(BASE + 0x40));

    assert_eq!(hits[1].name, "Global");
    assert_eq!(hits[1].offset, 0x10);
    assert_eq!(hits[1].address, Some(0xDEAD_BE00));

    assert_eq!(hits[2].name, "StubStart");
    assert_eq!(hits[2].offset, 0x05);
    assert_eq!(hits[2].length, 0x1C);
    assert_eq!(hits[2].address, None);
}

#[test]
fn signature_file_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.json");

    save_signatures(&path, &signatures()).unwrap();
    let loaded = load_signatures(&path).unwrap();

    assert_eq!(loaded.version, "image-v1");
    let compiled = loaded.compile().unwrap();
    assert_eq!(compiled.len(), 3);

    let image = image();
    let memory = SliceMemory::new(&image, BASE);
    let before = signatures().compile().unwrap().scan(&image, BASE, &memory);
    assert_eq!(compiled.scan(&image, BASE, &memory), before);
}

#[test]
fn kind_is_stored_as_text() {
    let json = serde_json::to_string(&signatures().entries[1].address).unwrap();
    assert_eq!(json, r#"{"kind":"rel32|indirect","relative_to":7}"#);
}
