/// Mask a credential for log output, keeping only its first character.
pub fn mask_secret(secret: &str) -> String {
    let mut chars = secret.chars();
    match chars.next() {
        Some(first) => {
            let mut masked = String::with_capacity(secret.len());
            masked.push(first);
            masked.extend(chars.map(|_| '*'));
            masked
        }
        None => String::new(),
    }
}
