/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Per-copy placeholders.
//!
//! Bulk copies are told apart by two reserved tokens: `#id#` becomes the
//! 1-based copy number and `#uuid#` a random UUID. A text uses one kind of
//! token at most; when both are present only `#id#` is replaced.

use std::borrow::Cow;

use uuid::Uuid;

pub const ID_TOKEN: &str = "#id#";
pub const UUID_TOKEN: &str = "#uuid#";

/// Replaces the placeholder tokens of `text` for the copy numbered `index`.
///
/// Every occurrence of the token is replaced. A `#uuid#` text gets a new
/// identifier on each call, shared by all of its occurrences.
pub fn substitute(text: &str, index: usize) -> Cow<'_, str> {
    if text.contains(ID_TOKEN) {
        text.replace(ID_TOKEN, &index.to_string()).into()
    } else if text.contains(UUID_TOKEN) {
        text.replace(UUID_TOKEN, &Uuid::new_v4().to_string()).into()
    } else {
        text.into()
    }
}
