//! Negacyclic number-theoretic transform over the Goldilocks prime.
//!
//! Ring: Z_q[X]/(X^n + 1) with q = 2^64 - 2^32 + 1. q - 1 is divisible by
//! 2^32, so a 2n-th root of unity exists for every power-of-two n up to
//! 2^31; all roots are derived at runtime from the multiplicative generator 7.
//! Forward transform is Cooley-Tukey with the psi twist merged into the
//! butterflies, inverse is Gentleman-Sande (Longa-Naehrig layout).

/// Ciphertext modulus, q = 2^64 - 2^32 + 1.
pub const MODULUS: u64 = 0xFFFF_FFFF_0000_0001;

/// Multiplicative generator of Z_q*.
const GENERATOR: u64 = 7;

#[inline]
pub fn add_mod(a: u64, b: u64) -> u64 {
    let (sum, carry) = a.overflowing_add(b);
    let mut r = sum;
    if carry || r >= MODULUS {
        r = r.wrapping_sub(MODULUS);
    }
    r
}

#[inline]
pub fn sub_mod(a: u64, b: u64) -> u64 {
    if a >= b {
        a - b
    } else {
        a.wrapping_sub(b).wrapping_add(MODULUS)
    }
}

#[inline]
pub fn mul_mod(a: u64, b: u64) -> u64 {
    ((a as u128 * b as u128) % MODULUS as u128) as u64
}

pub fn pow_mod(mut base: u64, mut exp: u64) -> u64 {
    let mut acc = 1u64;
    base %= MODULUS;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base);
        }
        base = mul_mod(base, base);
        exp >>= 1;
    }
    acc
}

pub fn inv_mod(a: u64) -> u64 {
    pow_mod(a, MODULUS - 2)
}

fn bit_reverse(x: usize, bits: u32) -> usize {
    x.reverse_bits() >> (usize::BITS - bits)
}

/// Precomputed twiddle tables for one transform size.
pub struct NttTables {
    n: usize,
    /// psi^brv(i) for i in 0..n.
    psi_rev: Vec<u64>,
    /// psi^-brv(i) for i in 0..n.
    psi_inv_rev: Vec<u64>,
    n_inv: u64,
}

impl NttTables {
    /// Builds tables for a power-of-two `n`.
    pub fn new(n: usize) -> Self {
        assert!(n.is_power_of_two() && n >= 2, "transform size must be a power of two");
        let log_n = n.trailing_zeros();
        // Primitive 2n-th root of unity; psi^n == -1 by construction.
        let psi = pow_mod(GENERATOR, (MODULUS - 1) / (2 * n as u64));
        debug_assert_eq!(pow_mod(psi, n as u64), MODULUS - 1);
        let psi_inv = inv_mod(psi);

        let mut pow_fwd = vec![0u64; n];
        let mut pow_inv = vec![0u64; n];
        let mut cur_f = 1u64;
        let mut cur_i = 1u64;
        for i in 0..n {
            pow_fwd[i] = cur_f;
            pow_inv[i] = cur_i;
            cur_f = mul_mod(cur_f, psi);
            cur_i = mul_mod(cur_i, psi_inv);
        }

        let mut psi_rev = vec![0u64; n];
        let mut psi_inv_rev = vec![0u64; n];
        for i in 0..n {
            let r = bit_reverse(i, log_n);
            psi_rev[i] = pow_fwd[r];
            psi_inv_rev[i] = pow_inv[r];
        }

        Self {
            n,
            psi_rev,
            psi_inv_rev,
            n_inv: inv_mod(n as u64),
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    /// In-place forward negacyclic NTT.
    pub fn forward(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let n = self.n;
        let mut t = n;
        let mut m = 1;
        while m < n {
            t /= 2;
            for i in 0..m {
                let j1 = 2 * i * t;
                let s = self.psi_rev[m + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = mul_mod(a[j + t], s);
                    a[j] = add_mod(u, v);
                    a[j + t] = sub_mod(u, v);
                }
            }
            m *= 2;
        }
    }

    /// In-place inverse negacyclic NTT, including the 1/n scaling.
    pub fn inverse(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let n = self.n;
        let mut t = 1;
        let mut m = n;
        while m > 1 {
            let h = m / 2;
            let mut j1 = 0;
            for i in 0..h {
                let s = self.psi_inv_rev[h + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = a[j + t];
                    a[j] = add_mod(u, v);
                    a[j + t] = mul_mod(sub_mod(u, v), s);
                }
                j1 += 2 * t;
            }
            t *= 2;
            m = h;
        }
        for x in a.iter_mut() {
            *x = mul_mod(*x, self.n_inv);
        }
    }

    /// Negacyclic product of a coefficient-domain polynomial with one already
    /// held in the NTT domain.
    pub fn mul_with_ntt(&self, a: &[u64], b_ntt: &[u64]) -> Vec<u64> {
        let mut r = a.to_vec();
        self.forward(&mut r);
        for (x, y) in r.iter_mut().zip(b_ntt.iter()) {
            *x = mul_mod(*x, *y);
        }
        self.inverse(&mut r);
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_have_expected_orders() {
        let t = NttTables::new(64);
        let psi = pow_mod(GENERATOR, (MODULUS - 1) / 128);
        assert_eq!(pow_mod(psi, 64), MODULUS - 1);
        assert_eq!(pow_mod(psi, 128), 1);
        assert_eq!(t.size(), 64);
    }

    #[test]
    fn forward_inverse_roundtrip() {
        let n = 256;
        let t = NttTables::new(n);
        let mut a: Vec<u64> = (0..n as u64).map(|i| i * 97 + 13).collect();
        let orig = a.clone();
        t.forward(&mut a);
        t.inverse(&mut a);
        assert_eq!(a, orig);
    }

    #[test]
    fn negacyclic_multiplication_matches_schoolbook() {
        let n = 8;
        let t = NttTables::new(n);
        let a: Vec<u64> = vec![1, 2, 3, 4, 0, 0, 0, 0];
        let b: Vec<u64> = vec![5, 6, 7, 0, 0, 0, 0, 0];

        // Schoolbook negacyclic convolution: X^n = -1.
        let mut expected = vec![0u64; n];
        for i in 0..n {
            for j in 0..n {
                let prod = mul_mod(a[i], b[j]);
                let k = i + j;
                if k < n {
                    expected[k] = add_mod(expected[k], prod);
                } else {
                    expected[k - n] = sub_mod(expected[k - n], prod);
                }
            }
        }

        let mut b_ntt = b.clone();
        t.forward(&mut b_ntt);
        let got = t.mul_with_ntt(&a, &b_ntt);
        assert_eq!(got, expected);
    }
}
