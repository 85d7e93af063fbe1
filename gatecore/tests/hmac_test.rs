use gatecore::crypto::{HmacSha256, hmac_sha256};
use hmac::Mac;

struct Vector {
    key: Vec<u8>,
    data: Vec<u8>,
    mac: &'static str,
}

// RFC 4231 test cases 1-4, 6 and 7 (case 5 is a truncated output).
fn rfc4231_vectors() -> Vec<Vector> {
    vec![
        Vector {
            key: vec![0x0b; 20],
            data: b"Hi There".to_vec(),
            mac: "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7",
        },
        Vector {
            key: b"Jefe".to_vec(),
            data: b"what do ya want for nothing?".to_vec(),
            mac: "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843",
        },
        Vector {
            key: vec![0xaa; 20],
            data: vec![0xdd; 50],
            mac: "773ea91e36800e46854db8ebd09181a72959098b3ef8c122d9635514ced565fe",
        },
        Vector {
            key: (0x01..=0x19).collect(),
            data: vec![0xcd; 50],
            mac: "82558a389a443c0ea4cc819899f2083a85f0faa3e578f8077a2e3ff46729665b",
        },
        Vector {
            key: vec![0xaa; 131],
            data: b"Test Using Larger Than Block-Size Key - Hash Key First".to_vec(),
            mac: "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54",
        },
        Vector {
            key: vec![0xaa; 131],
            data: b"This is a test using a larger than block-size key and a larger than block-size data. The key needs to be hashed before being used by the HMAC algorithm.".to_vec(),
            mac: "9b09ffa71b942fcb27635fbcd5b0e944bfdc63644f0713938a7f51535c3a35e2",
        },
    ]
}

fn oracle(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(key)
        .expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

#[test]
fn test_rfc4231_vectors() {
    for (i, v) in rfc4231_vectors().iter().enumerate() {
        let mut mac = HmacSha256::new(&v.key);
        mac.update(&v.data);
        assert_eq!(hex::encode(mac.finalize()), v.mac, "vector {i}");
    }
}

#[test]
fn test_key_lengths_around_block_size() {
    let data = b"session token data";
    for key_len in [0usize, 1, 16, 32, 63, 64, 65, 128, 200] {
        let key: Vec<u8> = (0..key_len).map(|i| (i * 7) as u8).collect();
        assert_eq!(
            hmac_sha256(&key, &[data]),
            oracle(&key, data),
            "key length {key_len}"
        );
    }
}

#[test]
fn test_split_updates_match_single_update() {
    let key = b"M1k3y1sdAb3St0n3";
    let whole = hmac_sha256(key, &[b"ABCDEFGHIJKLMNOP"]);
    let split = hmac_sha256(key, &[b"ABC", b"", b"DEFGHIJKLMNO", b"P"]);
    assert_eq!(whole, split);
}

#[test]
fn test_matches_detects_every_single_byte_mismatch() {
    let v = &rfc4231_vectors()[1];
    let expected: Vec<u8> = hex::decode(v.mac).unwrap();
    let mut mac = HmacSha256::new(&v.key);
    mac.update(&v.data);
    assert!(mac.clone().matches(&expected));

    for i in 0..expected.len() {
        let mut tampered = expected.clone();
        tampered[i] ^= 0x80;
        assert!(!mac.clone().matches(&tampered), "byte {i}");
    }
    assert!(!mac.matches(&expected[1..]));
}
