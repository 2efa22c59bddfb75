// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

use std::ops::Deref;

/// Configuration value that remembers whether it was set explicitly
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionDefault<T> {
    Some(T),
    Default(T),
}

impl<T> OptionDefault<T> {
    pub fn new(value: Option<T>, default: T) -> Self {
        match value {
            Some(val) => OptionDefault::Some(val),
            None => OptionDefault::Default(default),
        }
    }

    pub fn is_some(&self) -> bool {
        match *self {
            OptionDefault::Some(_) => true,
            OptionDefault::Default(_) => false,
        }
    }

    /// Explicit value takes precedence over the current one
    pub fn or_override(self, value: Option<T>) -> Self {
        match value {
            Some(val) => OptionDefault::Some(val),
            None => self,
        }
    }

    /// Replace built-in default, keep explicit value
    pub fn replace_default(self, default: Option<T>) -> Self {
        match (self, default) {
            (OptionDefault::Default(_), Some(val)) => OptionDefault::Default(val),
            (current, _) => current,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            OptionDefault::Some(val) => val,
            OptionDefault::Default(val) => val,
        }
    }
}

impl<T> Deref for OptionDefault<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            OptionDefault::Some(val) => val,
            OptionDefault::Default(val) => val,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_override_precedence() {
        let value = OptionDefault::new(None, 525);
        assert!(!value.is_some());
        let value = value.or_override(Some(600));
        assert_eq!(value, OptionDefault::Some(600));
        assert_eq!(value.or_override(None).into_inner(), 600);
    }

    #[test]
    fn test_replace_default() {
        assert_eq!(
            OptionDefault::new(None, 525).replace_default(Some(500)),
            OptionDefault::Default(500)
        );
        assert_eq!(
            OptionDefault::new(Some(650), 525).replace_default(Some(500)),
            OptionDefault::Some(650)
        );
        assert_eq!(*OptionDefault::new(None, 525).replace_default(None), 525);
    }
}
