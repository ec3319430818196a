//! Protocol and scanner constants.

/// Unhardened derivation path from the master secret to the climate root
/// secret. Deliberately distinct from the standard wallet path so the asset
/// authority key never collides with ordinary spending keys.
pub const ROOT_DERIVATION_PATH: [u32; 3] = [12381, 8444, 2050];

/// Reserved CREATE_COIN amount that reveals the authority (TAIL) program.
/// A gateway spend must contain exactly one condition with this amount.
pub const MELT_SENTINEL_AMOUNT: i64 = -113;

/// CLVM condition opcodes used by the gateway protocol.
pub const AGG_SIG_UNSAFE: u8 = 49;
pub const AGG_SIG_ME: u8 = 50;
pub const CREATE_COIN: u8 = 51;
pub const CREATE_COIN_ANNOUNCEMENT: u8 = 60;
pub const ASSERT_COIN_ANNOUNCEMENT: u8 = 61;

/// Human-readable prefix of the detokenization transport string.
pub const DETOK_HRP: &str = "detok";

/// Beneficiary metadata keys embedded in permissionless retirement spends.
pub const METADATA_KEY_BENEFICIARY_NAME: &str = "bn";
pub const METADATA_KEY_BENEFICIARY_ADDRESS: &str = "ba";
pub const METADATA_KEY_BENEFICIARY_PUZZLE_HASH: &str = "bp";

/// First block height the scanner considers.
pub const DEFAULT_BLOCK_START: u64 = 1_500_000;
/// Maximum number of blocks covered by a single scan window.
pub const DEFAULT_BLOCK_RANGE: u64 = 10_000;
/// Confirmations required before a spend is recorded.
pub const DEFAULT_MIN_DEPTH: u64 = 4;
/// Trailing blocks re-scanned every cycle (~36 hours) to absorb the
/// registry's delay in publishing asset metadata.
pub const DEFAULT_LOOKBACK_DEPTH: u64 = 6_912;
/// Default transaction fee in mojos.
pub const DEFAULT_FEE: u64 = 1_000_000_000;

/// Cost ceiling handed to the interpreter when replaying spend conditions.
pub const MAX_CLVM_COST: u64 = 11_000_000_000;
