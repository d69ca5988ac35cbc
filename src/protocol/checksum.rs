//! Checksum primitives shared by the vendor codecs.
//!
//! Two disciplines occur across the supported scales: an additive sum
//! modulo 256 (Difluid) and a single XOR byte over a designated range
//! (Bookoo, Decent, Eclair, Varia). Several vendors carry no checksum at
//! all and trust the transport.

/// Sum all bytes modulo 256.
///
/// # Arguments
///
/// * `data` - The bytes to sum
///
/// # Returns
///
/// The low byte of the sum
///
/// # Example
///
/// ```
/// use brewscale_ble::protocol::sum_mod256;
///
/// let data = [0xDF, 0xDF, 0x03, 0x05, 0x00];
/// assert_eq!(sum_mod256(&data), 0xC6);
/// ```
pub fn sum_mod256(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &byte| acc.wrapping_add(byte))
}

/// XOR all bytes together.
///
/// # Arguments
///
/// * `data` - The bytes to fold
///
/// # Returns
///
/// The XOR of every byte, 0 for an empty slice
pub fn xor(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

/// Verify a frame whose final byte is the additive checksum of everything
/// before it.
///
/// # Returns
///
/// `true` when the trailer matches, `false` for a mismatch or a frame too
/// short to carry one
pub fn verify_sum_trailer(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&trailer, body)) if !body.is_empty() => sum_mod256(body) == trailer,
        _ => false,
    }
}

/// Verify a frame whose final byte is the XOR of everything before it.
pub fn verify_xor_trailer(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&trailer, body)) if !body.is_empty() => xor(body) == trailer,
        _ => false,
    }
}

/// Append the additive checksum trailer to a command body.
///
/// Command encoding always recomputes the trailer over the just-assembled
/// bytes; callers never supply their own.
pub fn append_sum_trailer(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.push(sum_mod256(body));
    frame
}

/// Append the XOR checksum trailer to a command body.
pub fn append_xor_trailer(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.push(xor(body));
    frame
}
