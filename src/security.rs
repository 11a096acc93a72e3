// Copyright 2022, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The security manager: the database of known peers, its persistence, and
//! the pairing engine that drives classic Simple Pairing and LE SMP to a
//! bonding outcome.

pub mod commands;
pub mod events;
pub mod mocks;
pub mod pairing;
pub mod record;
pub mod storage;
pub mod store;
