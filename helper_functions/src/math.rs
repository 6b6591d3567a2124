// endianness is not configurable
pub fn int_to_bytes(int: u64, length: usize) -> Vec<u8> {
    let mut vec = int.to_le_bytes().to_vec();
    vec.resize(length, 0);
    vec
}

pub fn bytes_to_int(bytes: &[u8]) -> u64 {
    let mut array = [0; 8];
    array.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(array)
}

pub fn xor(lhs: &[u8; 32], rhs: &[u8; 32]) -> [u8; 32] {
    let mut result = [0; 32];
    for (i, byte) in result.iter_mut().enumerate() {
        *byte = lhs[i] ^ rhs[i];
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_to_bytes_value0_length_8() {
        let expected_bytes = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let output = int_to_bytes(0, 8);
        assert_eq!(expected_bytes, output.as_slice());
    }

    #[test]
    fn test_int_to_bytes_value2521273052_length_8() {
        let expected_bytes = [0xdc, 0x92, 0x47, 0x96, 0x00, 0x00, 0x00, 0x00];
        let output = int_to_bytes(2_521_273_052, 8);
        assert_eq!(expected_bytes, output.as_slice());
    }

    #[test]
    fn test_bytes_to_int_round_trip() {
        let bytes = int_to_bytes(88_813_769, 8);
        assert_eq!(bytes_to_int(&bytes), 88_813_769);
    }

    #[test]
    fn test_xor_self_is_zero() {
        let bytes = [0xAB; 32];
        assert_eq!(xor(&bytes, &bytes), [0; 32]);
    }
}
