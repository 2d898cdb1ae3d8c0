//! Flags supplied by the caller of an authorization request.

use bitflags::bitflags;

bitflags! {
    /// Options controlling one `authorize` call.
    ///
    /// The same flag set is stored per granted right in a
    /// [`RightsList`](super::RightsList), where only `PRE_AUTHORIZE` is
    /// meaningful.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct AuthorizationFlags: u32 {
        /// The engine may show an authentication dialog.
        const INTERACTION_ALLOWED  = 1 << 0;

        /// Rights not already held may be acquired by authenticating.
        const EXTEND_RIGHTS        = 1 << 1;

        /// Report success if at least one requested right was granted.
        const PARTIAL_RIGHTS       = 1 << 2;

        /// Do not keep acquired credentials on the token.
        const DESTROY_RIGHTS       = 1 << 3;

        /// Zero-timeout rules succeed optimistically.
        const PRE_AUTHORIZE        = 1 << 4;

        /// The request comes from an in-window sheet.
        const SHEET                = 1 << 5;

        /// Do not apply the password-only hint.
        const IGNORE_PASSWORD_ONLY = 1 << 6;

        /// Do not refuse interaction in the restricted low-power state.
        const IGNORE_LOW_POWER     = 1 << 7;
    }
}
