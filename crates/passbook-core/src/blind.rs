//! Local blind/unblind primitive over ristretto255
//!
//! ```text
//! client                                   station (key k)
//!   nonce  <- random
//!   P = H(nonce)
//!   r      <- random scalar
//!   B = r·P            ── blinded_request ──▶
//!                      ◀── signed_response ──  S = k·B
//!   U = r⁻¹·S = k·P
//!   finalized = (nonce, U)
//! ```
//!
//! The station only ever sees `B`, which is uniformly distributed for a
//! fresh `r`, so a finalized ticket presented later cannot be linked back
//! to the signing request that produced it.

use crate::error::BlindError;
use crate::ids::TicketId;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;

const HASH_TO_GROUP_DOMAIN: &[u8] = b"passbook/ticket-nonce/v1";

/// Blinded group element sent to the station for signing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlindedRequest(#[serde(with = "hex::serde")] pub [u8; 32]);

/// Station signature over a blinded request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignedResponse(#[serde(with = "hex::serde")] pub [u8; 32]);

/// Spendable ticket material: the nonce and the unblinded signature
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FinalizedTicket {
    #[serde(with = "hex::serde")]
    pub nonce: [u8; 32],
    #[serde(with = "hex::serde")]
    pub signature: [u8; 32],
}

impl FinalizedTicket {
    /// Identifier of the ticket this material belongs to
    #[inline]
    #[must_use]
    pub fn ticket_id(&self) -> TicketId {
        TicketId::from_nonce(&self.nonce)
    }
}

impl fmt::Debug for FinalizedTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizedTicket")
            .field("id", &self.ticket_id())
            .finish_non_exhaustive()
    }
}

/// Secret blinding scalar; never leaves the process
pub struct BlindingFactor(Scalar);

impl BlindingFactor {
    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(random_nonzero_scalar(rng))
    }
}

impl fmt::Debug for BlindingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlindingFactor(..)")
    }
}

/// One ticket slot between the blind and unblind steps
#[derive(Debug)]
pub struct PendingBlind {
    nonce: [u8; 32],
    factor: BlindingFactor,
    request: BlindedRequest,
}

impl PendingBlind {
    /// Draw a fresh nonce and blinding factor and blind the nonce
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut nonce = [0u8; 32];
        rng.fill_bytes(&mut nonce);
        let factor = BlindingFactor::random(rng);
        let blinded = factor.0 * hash_to_group(&nonce);
        Self {
            nonce,
            factor,
            request: BlindedRequest(blinded.compress().to_bytes()),
        }
    }

    /// Identifier the finalized ticket will carry
    #[inline]
    #[must_use]
    pub fn ticket_id(&self) -> TicketId {
        TicketId::from_nonce(&self.nonce)
    }

    /// The blinded request for the station
    #[inline]
    #[must_use]
    pub fn request(&self) -> BlindedRequest {
        self.request
    }

    /// Remove the blinding factor from the station's response
    pub fn unblind(&self, response: &SignedResponse) -> Result<FinalizedTicket, BlindError> {
        let signed = decompress(&response.0)?;
        let unblinded = self.factor.0.invert() * signed;
        Ok(FinalizedTicket {
            nonce: self.nonce,
            signature: unblinded.compress().to_bytes(),
        })
    }
}

/// Station-side signing key
///
/// The client never holds one; it lives here so stations, tests and
/// tooling share a single definition of the signing operation.
#[derive(Clone)]
pub struct IssuerKey {
    secret: Scalar,
}

impl IssuerKey {
    /// Generate a new random key
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            secret: random_nonzero_scalar(rng),
        }
    }

    /// Load a key from its canonical scalar encoding
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, BlindError> {
        let secret = Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
            .ok_or(BlindError::InvalidScalar)?;
        if secret == Scalar::ZERO {
            return Err(BlindError::InvalidScalar);
        }
        Ok(Self { secret })
    }

    /// Canonical scalar encoding
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Sign a blinded request
    pub fn sign(&self, request: &BlindedRequest) -> Result<SignedResponse, BlindError> {
        let blinded = decompress(&request.0)?;
        Ok(SignedResponse((self.secret * blinded).compress().to_bytes()))
    }

    /// Check a finalized ticket was signed by this key
    #[must_use]
    pub fn verify(&self, ticket: &FinalizedTicket) -> bool {
        match decompress(&ticket.signature) {
            Ok(signature) => self.secret * hash_to_group(&ticket.nonce) == signature,
            Err(_) => false,
        }
    }
}

impl fmt::Debug for IssuerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IssuerKey(..)")
    }
}

fn hash_to_group(nonce: &[u8; 32]) -> RistrettoPoint {
    let mut hasher = Sha512::new();
    hasher.update(HASH_TO_GROUP_DOMAIN);
    hasher.update(nonce);
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    RistrettoPoint::from_uniform_bytes(&wide)
}

fn random_nonzero_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    loop {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        let scalar = Scalar::from_bytes_mod_order_wide(&wide);
        if scalar != Scalar::ZERO {
            return scalar;
        }
    }
}

fn decompress(bytes: &[u8; 32]) -> Result<RistrettoPoint, BlindError> {
    let point = CompressedRistretto(*bytes)
        .decompress()
        .ok_or(BlindError::InvalidPoint)?;
    if point == RistrettoPoint::identity() {
        return Err(BlindError::IdentityPoint);
    }
    Ok(point)
}
