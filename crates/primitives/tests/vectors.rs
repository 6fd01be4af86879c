//! Hash helpers checked against published digests.

use zend_primitives::{sha256, sha256d};

fn hex_to_bytes(hex: &str) -> Vec<u8> {
    assert!(hex.len() % 2 == 0, "odd hex length");
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    let mut iter = hex.as_bytes().iter().copied();
    while let (Some(high), Some(low)) = (iter.next(), iter.next()) {
        let high = (high as char).to_digit(16).expect("hex digit") as u8;
        let low = (low as char).to_digit(16).expect("hex digit") as u8;
        bytes.push(high << 4 | low);
    }
    bytes
}

#[test]
fn sha256_matches_nist_vectors() {
    // FIPS 180-2 examples.
    let cases = [
        (
            &b""[..],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        ),
        (
            &b"abc"[..],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        ),
        (
            &b"abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq"[..],
            "248d6a61d20638b8e5c026930c3e6039a33ce45964ff2167f6ecedd419db06c1",
        ),
    ];
    for (input, expected) in cases {
        assert_eq!(sha256(input).to_vec(), hex_to_bytes(expected));
    }
}

#[test]
fn sha256d_is_sha256_applied_twice() {
    // hex(sha256d(b"hello")) as used for txids.
    let expected = "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50";
    assert_eq!(sha256d(b"hello").to_vec(), hex_to_bytes(expected));
    assert_eq!(sha256d(b"hello"), sha256(&sha256(b"hello")));
}
