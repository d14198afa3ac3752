// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may
// not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! String type that can either borrow from decoded event data or own its
//! content, so that values derived from an event record do not have to copy
//! out of the record buffer.

use core::{
    borrow::Borrow,
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
};

use smartstring::alias::String;

#[derive(Debug, Clone)]
pub struct Str<'a> {
    inner: InnerStr<'a>,
}

#[derive(Debug, Clone)]
enum InnerStr<'a> {
    Borrowed(&'a str),
    Owned(String),
}

impl<'a> Str<'a> {
    #[inline]
    pub fn new_borrowed(s: &'a str) -> Self {
        Str {
            inner: InnerStr::Borrowed(s),
        }
    }

    #[inline]
    pub fn new_owned<S: Into<String>>(s: S) -> Self {
        Str {
            inner: InnerStr::Owned(s.into()),
        }
    }

    #[inline]
    pub fn into_static(self) -> Str<'static> {
        Str {
            inner: InnerStr::Owned(match self.inner {
                InnerStr::Owned(s) => s,
                InnerStr::Borrowed(s) => s.into(),
            }),
        }
    }
}

impl<'a> Deref for Str<'a> {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        match &self.inner {
            InnerStr::Borrowed(s) => s,
            InnerStr::Owned(s) => s,
        }
    }
}

impl<'a> AsRef<str> for Str<'a> {
    #[inline]
    fn as_ref(&self) -> &str {
        self
    }
}

impl<'a> Borrow<str> for Str<'a> {
    #[inline]
    fn borrow(&self) -> &str {
        self
    }
}

impl<'a> From<&'a str> for Str<'a> {
    #[inline]
    fn from(s: &'a str) -> Str<'a> {
        Str::new_borrowed(s)
    }
}

impl<'a> From<String> for Str<'a> {
    #[inline]
    fn from(s: String) -> Str<'a> {
        Str::new_owned(s)
    }
}

impl<'a> PartialEq<Self> for Str<'a> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.deref() == other.deref()
    }
}

impl<'a> Eq for Str<'a> {}

impl<'a> PartialEq<str> for Str<'a> {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.deref() == other
    }
}

impl<'a> PartialOrd for Str<'a> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for Str<'a> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.deref().cmp(other.deref())
    }
}

impl<'a> Hash for Str<'a> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        Hash::hash(self.deref(), state)
    }
}

impl<'a> fmt::Display for Str<'a> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        fmt::Display::fmt(self.deref(), f)
    }
}
