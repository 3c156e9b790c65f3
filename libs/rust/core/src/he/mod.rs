//! CKKS-style homomorphic encryption, scoped to what secure aggregation
//! needs: encode/encrypt real-valued vectors, add ciphertexts, decrypt the
//! aggregate. No multiplication, relinearization or rescaling.
//!
//! Values are fixed-point encoded into polynomial coefficients at a
//! configurable scale and encrypted under a symmetric Ring-LWE key. Addition
//! is exact in the encoded domain; the only approximation error is the
//! per-ciphertext noise, which stays around 2^-35 relative at the default
//! 2^40 scale, well inside the protocol's 1e-3 tolerance.
//!
//! The aggregate of k sanitized deltas is bounded by k * 10 * scale, orders
//! of magnitude below q/2, so encoded sums never wrap.

pub mod ntt;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use rand::Rng;
use serde::{Deserialize, Serialize};

use ntt::{add_mod, sub_mod, NttTables, MODULUS};

static GLOBAL_CONTEXT: OnceCell<Arc<CkksContext>> = OnceCell::new();

/// Process-wide context, created on first use and never rotated. The
/// parameters of later calls are ignored once the context exists.
pub fn global_context(params: HeParams) -> Arc<CkksContext> {
    GLOBAL_CONTEXT
        .get_or_init(|| Arc::new(CkksContext::new(params)))
        .clone()
}

/// Scheme parameters. Process-lifetime constants once a context is built.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeParams {
    /// Ring dimension N (power of two). Also the slot count per ciphertext.
    pub poly_modulus_degree: usize,
    /// log2 of the fixed-point encoding scale.
    pub scale_bits: u32,
}

impl Default for HeParams {
    fn default() -> Self {
        Self {
            poly_modulus_degree: 8192,
            scale_bits: 40,
        }
    }
}

impl HeParams {
    pub fn scale(&self) -> f64 {
        (self.scale_bits as f64).exp2()
    }

    pub fn scheme_name(&self) -> &'static str {
        "ckks"
    }
}

/// Encryption context: parameters, transform tables and the secret key.
/// Created once per process and shared read-only; both encryption and
/// decryption happen on the aggregating side in the current protocol.
pub struct CkksContext {
    params: HeParams,
    tables: NttTables,
    /// Ternary secret, kept in the NTT domain.
    secret_ntt: Vec<u64>,
}

impl CkksContext {
    pub fn new(params: HeParams) -> Self {
        assert!(
            params.poly_modulus_degree.is_power_of_two() && params.poly_modulus_degree >= 2,
            "poly_modulus_degree must be a power of two"
        );
        let tables = NttTables::new(params.poly_modulus_degree);
        let mut rng = rand::thread_rng();
        let mut secret: Vec<u64> = (0..params.poly_modulus_degree)
            .map(|_| match rng.gen_range(0u8..3) {
                0 => 0,
                1 => 1,
                _ => MODULUS - 1, // -1
            })
            .collect();
        tables.forward(&mut secret);
        Self {
            params,
            tables,
            secret_ntt: secret,
        }
    }

    pub fn params(&self) -> &HeParams {
        &self.params
    }

    fn degree(&self) -> usize {
        self.params.poly_modulus_degree
    }

    /// Centered binomial noise, eta = 8 (std ~ 2).
    fn sample_noise(&self, rng: &mut impl Rng) -> Vec<u64> {
        (0..self.degree())
            .map(|_| {
                let bits = rng.gen::<u16>();
                let pos = (bits & 0x00FF).count_ones() as i64;
                let neg = (bits >> 8).count_ones() as i64;
                let e = pos - neg;
                if e >= 0 {
                    e as u64
                } else {
                    MODULUS - (-e) as u64
                }
            })
            .collect()
    }

    fn encode(&self, values: &[f64]) -> Vec<u64> {
        let scale = self.params.scale();
        let mut coeffs = vec![0u64; self.degree()];
        for (c, v) in coeffs.iter_mut().zip(values.iter()) {
            let scaled = (v * scale).round();
            *c = if scaled >= 0.0 {
                scaled as u64
            } else {
                MODULUS - (-scaled) as u64
            };
        }
        coeffs
    }

    fn decode(&self, coeffs: &[u64], len: usize) -> Vec<f64> {
        let scale = self.params.scale();
        let half = MODULUS / 2;
        coeffs[..len]
            .iter()
            .map(|&c| {
                if c > half {
                    -((MODULUS - c) as f64) / scale
                } else {
                    c as f64 / scale
                }
            })
            .collect()
    }

    /// Encrypts one slot-block of at most N values.
    fn encrypt_block(&self, values: &[f64], rng: &mut impl Rng) -> Ciphertext {
        let m = self.encode(values);
        let a: Vec<u64> = (0..self.degree()).map(|_| rng.gen_range(0..MODULUS)).collect();
        let e = self.sample_noise(rng);
        let a_s = self.tables.mul_with_ntt(&a, &self.secret_ntt);
        // c0 = m + e - a*s, c1 = a
        let c0 = m
            .iter()
            .zip(e.iter())
            .zip(a_s.iter())
            .map(|((&m_i, &e_i), &as_i)| sub_mod(add_mod(m_i, e_i), as_i))
            .collect();
        Ciphertext { c0, c1: a }
    }

    fn decrypt_block(&self, ct: &Ciphertext, len: usize) -> Vec<f64> {
        let c1_s = self.tables.mul_with_ntt(&ct.c1, &self.secret_ntt);
        let m: Vec<u64> = ct
            .c0
            .iter()
            .zip(c1_s.iter())
            .map(|(&c0_i, &c1s_i)| add_mod(c0_i, c1s_i))
            .collect();
        self.decode(&m, len)
    }
}

/// One RLWE ciphertext pair.
#[derive(Debug, Clone)]
struct Ciphertext {
    c0: Vec<u64>,
    c1: Vec<u64>,
}

impl Ciphertext {
    fn add_assign(&mut self, other: &Ciphertext) {
        for (a, b) in self.c0.iter_mut().zip(other.c0.iter()) {
            *a = add_mod(*a, *b);
        }
        for (a, b) in self.c1.iter_mut().zip(other.c1.iter()) {
            *a = add_mod(*a, *b);
        }
    }
}

/// An encrypted real vector of arbitrary length, chunked across as many
/// ciphertexts as the ring dimension requires.
pub struct CkksVector {
    len: usize,
    chunks: Vec<Ciphertext>,
}

impl CkksVector {
    pub fn encrypt(ctx: &CkksContext, values: &[f64]) -> Self {
        let mut rng = rand::thread_rng();
        let chunks = values
            .chunks(ctx.degree())
            .map(|block| ctx.encrypt_block(block, &mut rng))
            .collect();
        Self {
            len: values.len(),
            chunks,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Homomorphic element-wise addition. Operand lengths must match; no
    /// plaintext is involved.
    pub fn add_assign(&mut self, other: &CkksVector) -> anyhow::Result<()> {
        if self.len != other.len {
            anyhow::bail!(
                "ciphertext length mismatch: {} vs {}",
                self.len,
                other.len
            );
        }
        for (a, b) in self.chunks.iter_mut().zip(other.chunks.iter()) {
            a.add_assign(b);
        }
        Ok(())
    }

    pub fn decrypt(&self, ctx: &CkksContext) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.len);
        let mut remaining = self.len;
        for chunk in &self.chunks {
            let take = remaining.min(ctx.degree());
            out.extend(ctx.decrypt_block(chunk, take));
            remaining -= take;
        }
        out
    }
}
