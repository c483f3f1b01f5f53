use rand::Rng;

/// Generates a random join code of `length` characters from `alphabet`.
///
/// An empty alphabet yields an empty code.
pub fn generate_code(length: usize, alphabet: &str) -> String {
    let chars: Vec<char> = alphabet.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let mut rng = rand::rng();
    (0..length)
        .map(|_| chars[rng.random_range(0..chars.len())])
        .collect()
}
