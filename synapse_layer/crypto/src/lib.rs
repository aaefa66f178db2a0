// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

pub mod aead;
pub mod identity;

pub use aead::{decrypt, derive_channel_key, encrypt, encrypt_with_seed, AeadError, ChannelKey};
pub use identity::{load_or_create_identity, IdentityError, SynapseKeypair};
