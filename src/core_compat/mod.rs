// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Compatibility layer over the allocator API.
//!
//! On a nightly toolchain the crate uses `core`/`alloc` directly; on stable
//! it goes through `allocator-api2`, the conventional polyfill. Everything
//! else in the crate imports allocation types from here so the switch stays
//! in one place.

// The `nightly` cfg value is auto-detected and set in the crate's build script.

pub mod alloc {
    #[cfg(nightly)]
    pub use core::alloc::{AllocError, Allocator, Layout};

    #[cfg(nightly)]
    pub use ::alloc::alloc::Global;

    #[cfg(not(nightly))]
    pub use allocator_api2::alloc::{AllocError, Allocator, Global, Layout};

    pub mod collections {
        #[cfg(nightly)]
        pub use ::alloc::collections::TryReserveError;

        #[cfg(not(nightly))]
        pub use allocator_api2::collections::TryReserveError;
    }
}

pub mod boxed {
    #[cfg(nightly)]
    pub use ::alloc::boxed::Box;

    #[cfg(not(nightly))]
    pub use allocator_api2::boxed::Box;
}

pub mod vec {
    #[cfg(nightly)]
    pub use ::alloc::vec::Vec;

    #[cfg(not(nightly))]
    pub use allocator_api2::vec::Vec;
}
