//! ABI bindings for the inbox contract.
//!
//! Event payloads and prove inputs are packed with `inbox_codec`; the ABI
//! layer only ever sees them as opaque `bytes`.

use alloy::sol;

sol! {
    interface IInbox {
        event Proposed(bytes data);
        event Proved(bytes data);

        function prove(bytes calldata _data, bytes calldata _proof) external;
    }

    /// One proof checked by the inbox's proof verifier.
    struct VerifierProof {
        address verifier;
        bytes proof;
    }
}
