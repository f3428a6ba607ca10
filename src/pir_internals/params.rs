use crate::pir_internals::{branch_opt_util, decomposition, error::PirError};
use fhe::bfv::{BfvParameters, BfvParametersBuilder};
use std::{fmt::Display, sync::Arc};

/// Coefficient modulus chains providing 128-bit security at each supported ring degree,
/// with enough levels for query expansion, one multiply-accumulate pass per dimension and
/// a final modulus switch. Sizes follow the chains used by the BFV reference PIR setups.
const MODULI_SIZES_BY_DEGREE: &[(usize, &[usize])] = &[(4096, &[36, 36, 37]), (8192, &[50, 55, 55]), (16384, &[55, 55, 55, 55])];

const MIN_PLAINTEXT_BIT_LEN: usize = 12;

/// Bits of headroom the smallest coefficient modulus must keep over the plaintext modulus,
/// so that a modulus-switched reply still decrypts correctly.
const PLAINTEXT_NOISE_MARGIN_BITS: usize = 10;

/// Derives BFV encryption parameters for a given power-of-two ring degree and plaintext
/// modulus bit-width.
///
/// The coefficient modulus chain comes from a fixed per-degree table sized for the
/// multiplicative depth of multi-dimensional PIR reply generation at 128-bit security.
/// The plaintext modulus is the smallest NTT-friendly prime (congruent to 1 mod 2N) of
/// exactly `plaintext_bit_len` bits, so that plaintext polynomials remain batchable.
///
/// # Arguments
///
/// * `degree` - The polynomial ring degree N; one of 4096, 8192 or 16384.
/// * `plaintext_bit_len` - The bit-width of the plaintext modulus.
///
/// # Returns
///
/// Shared, immutable BFV parameters on success. Fails when the degree is unsupported,
/// when the bit-width leaves too little noise headroom against the smallest coefficient
/// modulus, or when no prime of the requested width exists.
pub fn generate_encryption_params(degree: usize, plaintext_bit_len: usize) -> Result<Arc<BfvParameters>, PirError> {
    let moduli_sizes = moduli_sizes_for_degree(degree).ok_or(PirError::UnsupportedRingDegree(degree))?;

    let min_modulus_bit_len = moduli_sizes.iter().copied().min().unwrap_or(0);
    let max_plaintext_bit_len = min_modulus_bit_len.saturating_sub(PLAINTEXT_NOISE_MARGIN_BITS);
    if branch_opt_util::unlikely(!(MIN_PLAINTEXT_BIT_LEN..=max_plaintext_bit_len).contains(&plaintext_bit_len)) {
        return Err(PirError::UnsupportedPlaintextBitWidth {
            bit_len: plaintext_bit_len,
            min: MIN_PLAINTEXT_BIT_LEN,
            max: max_plaintext_bit_len,
        });
    }

    let plaintext_modulus = find_plaintext_modulus(degree, plaintext_bit_len).ok_or(PirError::NoSuitablePlaintextModulus {
        bit_len: plaintext_bit_len,
        degree,
    })?;

    BfvParametersBuilder::new()
        .set_degree(degree)
        .set_plaintext_modulus(plaintext_modulus)
        .set_moduli_sizes(moduli_sizes)
        .build_arc()
        .map_err(|e| PirError::InvalidEncryptionParameters(e.to_string()))
}

/// Checks that already-built encryption parameters satisfy the constraints this engine
/// relies on: a supported ring degree, a coefficient modulus chain with at least three
/// levels, and a prime NTT-friendly plaintext modulus strictly below every coefficient
/// modulus. Fails with a parameter error otherwise.
pub fn verify_encryption_params(params: &Arc<BfvParameters>) -> Result<(), PirError> {
    let degree = params.degree();
    if moduli_sizes_for_degree(degree).is_none() {
        return Err(PirError::UnsupportedRingDegree(degree));
    }
    if params.moduli().len() < 3 {
        return Err(PirError::InvalidEncryptionParameters(
            "the coefficient modulus chain must have at least three levels".to_string(),
        ));
    }

    let t = params.plaintext();
    if t % (2 * degree as u64) != 1 {
        return Err(PirError::InvalidEncryptionParameters(format!(
            "plaintext modulus {} is not congruent to 1 mod 2N",
            t
        )));
    }
    if !is_prime(t) {
        return Err(PirError::InvalidEncryptionParameters(format!("plaintext modulus {} is not prime", t)));
    }
    if params.moduli().iter().any(|&q| q <= t) {
        return Err(PirError::InvalidEncryptionParameters(
            "plaintext modulus must be strictly smaller than every coefficient modulus".to_string(),
        ));
    }

    Ok(())
}

/// PIR protocol parameters, derived once from the database shape and the encryption
/// parameters, then shared read-only by client and server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PirParams {
    item_count: usize,
    item_byte_len: usize,
    elements_per_plaintext: usize,
    num_plaintexts: usize,
    dimensions: Vec<usize>,
    expansion_ratio: usize,
    symmetric: bool,
    batching: bool,
    mod_switching: bool,
}

impl PirParams {
    /// Derives the PIR parameters for a database of `item_count` records of
    /// `item_byte_len` bytes each, arranged along `dimension_count` dimensions.
    ///
    /// The number of items batched per plaintext follows from the plaintext byte
    /// capacity `floor(N * log2(t) / 8)`. With `batching` enabled as many whole items as
    /// possible share one plaintext; disabled, every item gets its own plaintext. Either
    /// way a single item must fit inside one plaintext.
    ///
    /// The flattened plaintext space is factored into `dimension_count` near-equal
    /// extents; earlier dimensions absorb the remainder, and the extent product is
    /// always at least the number of plaintexts.
    ///
    /// # Arguments
    ///
    /// * `item_count` - Number of records in the database.
    /// * `item_byte_len` - Fixed byte size of each record.
    /// * `dimension_count` - Number of PIR dimensions `d`; more dimensions shrink the
    ///   query at the cost of extra server computation.
    /// * `params` - The encryption parameters both sides agreed on.
    /// * `symmetric` - Encrypt queries under the secret key (smaller) instead of the
    ///   public key.
    /// * `batching` - Pack multiple items into each plaintext.
    /// * `mod_switching` - Switch the final reply to the last modulus level, shrinking
    ///   reply size at the cost of extra server work.
    pub fn new(
        item_count: usize,
        item_byte_len: usize,
        dimension_count: usize,
        params: &Arc<BfvParameters>,
        symmetric: bool,
        batching: bool,
        mod_switching: bool,
    ) -> Result<PirParams, PirError> {
        if branch_opt_util::unlikely(item_count == 0) {
            return Err(PirError::EmptyDatabase);
        }
        if branch_opt_util::unlikely(item_byte_len == 0) {
            return Err(PirError::InvalidItemByteLength);
        }
        if branch_opt_util::unlikely(dimension_count == 0) {
            return Err(PirError::InvalidDimensionCount(dimension_count));
        }

        let capacity_byte_len = plaintext_byte_capacity(params);
        if item_byte_len > capacity_byte_len {
            return Err(PirError::ItemTooLargeForPlaintext {
                item_byte_len,
                capacity_byte_len,
            });
        }
        // With batching off, or when a batched layout degenerates, fall back to one item
        // per plaintext.
        let elements_per_plaintext = if batching { (capacity_byte_len / item_byte_len).max(1) } else { 1 };

        let num_plaintexts = item_count.div_ceil(elements_per_plaintext);
        let dimensions = derive_extents(num_plaintexts, dimension_count);

        let degree = params.degree();
        if let Some(&extent) = dimensions.iter().find(|&&extent| extent > degree) {
            return Err(PirError::DimensionExtentTooLarge { extent, degree });
        }

        Ok(PirParams {
            item_count,
            item_byte_len,
            elements_per_plaintext,
            num_plaintexts,
            dimensions,
            expansion_ratio: decomposition::expansion_ratio(params),
            symmetric,
            batching,
            mod_switching,
        })
    }

    #[inline(always)]
    pub fn item_count(&self) -> usize {
        self.item_count
    }
    #[inline(always)]
    pub fn item_byte_len(&self) -> usize {
        self.item_byte_len
    }
    #[inline(always)]
    pub fn elements_per_plaintext(&self) -> usize {
        self.elements_per_plaintext
    }
    #[inline(always)]
    pub fn num_plaintexts(&self) -> usize {
        self.num_plaintexts
    }
    /// Per-dimension extents of the plaintext index space, most significant first.
    #[inline(always)]
    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }
    /// Number of plaintexts needed to losslessly carry one last-level ciphertext.
    #[inline(always)]
    pub fn expansion_ratio(&self) -> usize {
        self.expansion_ratio
    }
    #[inline(always)]
    pub fn symmetric(&self) -> bool {
        self.symmetric
    }
    #[inline(always)]
    pub fn batching(&self) -> bool {
        self.batching
    }
    #[inline(always)]
    pub fn mod_switching(&self) -> bool {
        self.mod_switching
    }

    /// Ciphertexts in a query: one per dimension.
    #[inline(always)]
    pub fn query_ciphertext_count(&self) -> usize {
        self.dimensions.len()
    }

    /// Ciphertexts in a reply: each dimension past the first multiplies the bundle by
    /// the expansion ratio.
    pub fn reply_ciphertext_count(&self) -> usize {
        self.expansion_ratio.pow((self.dimensions.len() - 1) as u32)
    }

    /// Oblivious expansion depth the client's Galois keys must support.
    pub(crate) fn expansion_level(&self) -> usize {
        self.dimensions
            .iter()
            .map(|extent| extent.next_power_of_two().ilog2() as usize)
            .max()
            .unwrap_or(1)
            .max(1)
    }
}

impl Display for PirParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PirParams {{ items: {} x {} B, {} per plaintext, {} plaintexts arranged {:?}, expansion ratio {}, symmetric: {}, batching: {}, mod switching: {} }}",
            self.item_count,
            self.item_byte_len,
            self.elements_per_plaintext,
            self.num_plaintexts,
            self.dimensions,
            self.expansion_ratio,
            self.symmetric,
            self.batching,
            self.mod_switching
        )
    }
}

/// Bit-width of the plaintext modulus, i.e. how many bits each polynomial coefficient
/// can carry losslessly.
#[inline(always)]
pub fn plaintext_bit_len(params: &Arc<BfvParameters>) -> usize {
    params.plaintext().ilog2() as usize
}

/// Whole bytes one plaintext polynomial can carry.
#[inline(always)]
pub fn plaintext_byte_capacity(params: &Arc<BfvParameters>) -> usize {
    (params.degree() * plaintext_bit_len(params)) / 8
}

fn moduli_sizes_for_degree(degree: usize) -> Option<&'static [usize]> {
    MODULI_SIZES_BY_DEGREE.iter().find(|(d, _)| *d == degree).map(|(_, sizes)| *sizes)
}

/// Smallest prime of exactly `bit_len` bits congruent to 1 mod 2N.
fn find_plaintext_modulus(degree: usize, bit_len: usize) -> Option<u64> {
    let step = 2 * degree as u64;
    let lo = 1u64 << bit_len;
    let hi = 1u64 << (bit_len + 1);

    let mut candidate = lo.div_ceil(step) * step + 1;
    while candidate < hi {
        if is_prime(candidate) {
            return Some(candidate);
        }
        candidate += step;
    }
    None
}

/// Factors `num_plaintexts` into `d` near-equal extents whose product is at least
/// `num_plaintexts`. Extent `k` is the smallest integer whose `(d - k)`-th power covers
/// what is still unassigned, so earlier dimensions absorb the remainder.
fn derive_extents(num_plaintexts: usize, d: usize) -> Vec<usize> {
    let mut extents = Vec::with_capacity(d);
    let mut remaining = num_plaintexts;

    for k in 0..d {
        let extent = nth_root_ceil(remaining, d - k);
        extents.push(extent);
        remaining = remaining.div_ceil(extent);
    }

    extents
}

/// Smallest `e >= 1` with `e^n >= value`.
fn nth_root_ceil(value: usize, n: usize) -> usize {
    debug_assert!(n >= 1);
    if value <= 1 {
        return 1;
    }

    let mut e = ((value as f64).powf(1.0 / n as f64).ceil() as usize).max(1);
    while e > 1 && pow_at_least(e - 1, n, value) {
        e -= 1;
    }
    while !pow_at_least(e, n, value) {
        e += 1;
    }
    e
}

fn pow_at_least(base: usize, exp: usize, target: usize) -> bool {
    let mut acc = 1usize;
    for _ in 0..exp {
        acc = match acc.checked_mul(base) {
            Some(v) => v,
            None => return true,
        };
        if acc >= target {
            return true;
        }
    }
    acc >= target
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut acc = 1u64;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    acc
}

/// Deterministic Miller-Rabin for u64; the chosen witness set covers all 64-bit integers.
fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for p in [2u64, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
        if n == p {
            return true;
        }
        if n % p == 0 {
            return false;
        }
    }

    let s = (n - 1).trailing_zeros();
    let d = (n - 1) >> s;

    'witness: for a in [2u64, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test_case(1, 1)]
    #[test_case(1, 3)]
    #[test_case(13, 2)]
    #[test_case(26, 3)]
    #[test_case(1000, 2)]
    #[test_case(1000, 3)]
    #[test_case(65536, 2)]
    fn extent_product_covers_plaintext_count(num_plaintexts: usize, d: usize) {
        let extents = derive_extents(num_plaintexts, d);

        assert_eq!(extents.len(), d);
        assert!(extents.iter().product::<usize>() >= num_plaintexts);
        // Earlier dimensions absorb the remainder.
        for pair in extents.windows(2) {
            assert!(pair[0] + 1 >= pair[1], "extents should be near-equal, got {:?}", extents);
        }
    }

    #[test]
    fn nth_root_ceil_is_exact() {
        assert_eq!(nth_root_ceil(1, 3), 1);
        assert_eq!(nth_root_ceil(8, 3), 2);
        assert_eq!(nth_root_ceil(9, 3), 3);
        assert_eq!(nth_root_ceil(16, 2), 4);
        assert_eq!(nth_root_ceil(17, 2), 5);
    }

    #[test]
    fn plaintext_modulus_is_ntt_friendly_and_sized() {
        for (degree, bit_len) in [(4096usize, 20usize), (8192, 22), (8192, 40)] {
            let t = find_plaintext_modulus(degree, bit_len).expect("a prime must exist in this window");

            assert!(is_prime(t));
            assert_eq!(t % (2 * degree as u64), 1);
            assert_eq!(t.ilog2() as usize, bit_len);
        }
    }

    #[test]
    fn miller_rabin_agrees_on_small_numbers() {
        let naive = |n: u64| n >= 2 && (2..n).take_while(|d| d * d <= n).all(|d| n % d != 0);
        for n in 0..2000u64 {
            assert_eq!(is_prime(n), naive(n), "disagreement at {}", n);
        }
    }

    #[test]
    fn rejects_unsupported_degree() {
        assert_eq!(generate_encryption_params(1024, 20), Err(PirError::UnsupportedRingDegree(1024)));
    }

    #[test]
    fn rejects_oversized_plaintext_bit_width() {
        let err = generate_encryption_params(4096, 30).unwrap_err();
        assert!(matches!(err, PirError::UnsupportedPlaintextBitWidth { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Parameter);
    }

    #[test]
    fn derived_params_pass_verification() {
        let params = generate_encryption_params(4096, 20).unwrap();
        verify_encryption_params(&params).unwrap();
    }

    #[test]
    fn rejects_item_larger_than_plaintext() {
        let params = generate_encryption_params(4096, 20).unwrap();
        let capacity = plaintext_byte_capacity(&params);

        let err = PirParams::new(8, capacity + 1, 2, &params, true, true, true).unwrap_err();
        assert!(matches!(err, PirError::ItemTooLargeForPlaintext { .. }));
    }

    #[test]
    fn batching_falls_back_to_one_item_per_plaintext() {
        let params = generate_encryption_params(4096, 20).unwrap();
        let capacity = plaintext_byte_capacity(&params);

        // An item filling more than half a plaintext can not share it with another one.
        let pir_params = PirParams::new(8, capacity - 1, 1, &params, true, true, true).unwrap();
        assert_eq!(pir_params.elements_per_plaintext(), 1);
        assert_eq!(pir_params.num_plaintexts(), 8);
    }

    #[test]
    fn query_and_reply_counts_follow_dimensions() {
        let params = generate_encryption_params(4096, 20).unwrap();
        let pir_params = PirParams::new(1 << 16, 288, 2, &params, true, true, true).unwrap();

        assert_eq!(pir_params.query_ciphertext_count(), 2);
        assert_eq!(pir_params.reply_ciphertext_count(), pir_params.expansion_ratio());
        assert!(pir_params.dimensions().iter().product::<usize>() >= pir_params.num_plaintexts());
    }
}
