// id_gen.rs - Firestore-style auto-generated document ids.
//
// Document ids here are always plain 20-char alphanumeric strings drawn
// from a cryptographic RNG, following eshanized-AeroDB's dependency choice
// for the same concern (`rand` over `uuid`).

use rand::rngs::OsRng;
use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 20;

pub fn generate_id() -> String {
    let mut rng = OsRng;
    (0..ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_id_has_expected_length_and_alphabet() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_ids_are_distinct() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
