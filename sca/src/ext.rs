pub mod account {
    /// Public key account actor method.
    pub const PUBKEY_ADDRESS_METHOD: u64 = 2;
}
