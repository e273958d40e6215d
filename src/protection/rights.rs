//! Usage rights and the roles that bundle them

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MipError;

pub const VIEW: &str = "VIEW";
pub const EDIT: &str = "EDIT";
pub const DOCEDIT: &str = "DOCEDIT";
pub const EXTRACT: &str = "EXTRACT";
pub const PRINT: &str = "PRINT";
pub const COMMENT: &str = "COMMENT";
pub const EXPORT: &str = "EXPORT";
pub const FORWARD: &str = "FORWARD";
pub const REPLY: &str = "REPLY";
pub const REPLY_ALL: &str = "REPLYALL";
pub const OBJECT_MODEL: &str = "OBJMODEL";
pub const VIEW_RIGHTS_DATA: &str = "VIEWRIGHTSDATA";
pub const EDIT_RIGHTS_DATA: &str = "EDITRIGHTSDATA";
pub const OWNER: &str = "OWNER";
pub const AUDITED_EXTRACT: &str = "AUDITEDEXTRACT";

/// Every well-known right
pub const ALL_RIGHTS: [&str; 15] = [
    VIEW,
    EDIT,
    DOCEDIT,
    EXTRACT,
    PRINT,
    COMMENT,
    EXPORT,
    FORWARD,
    REPLY,
    REPLY_ALL,
    OBJECT_MODEL,
    VIEW_RIGHTS_DATA,
    EDIT_RIGHTS_DATA,
    OWNER,
    AUDITED_EXTRACT,
];

/// Principal granted to every authenticated user
pub const ANYONE: &str = "ANYONE";

/// Rights compare case-insensitively; the canonical form is upper case
pub fn normalize(right: &str) -> String {
    right.trim().to_ascii_uppercase()
}

/// Normalized, de-duplicated, sorted
pub fn normalize_all<I, S>(rights: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    rights
        .into_iter()
        .map(|r| normalize(r.as_ref()))
        .filter(|r| !r.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Normalized rights with OWNER expanded to every well-known right
pub fn effective<I, S>(rights: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut granted = normalize_all(rights);
    if granted.iter().any(|r| r == OWNER) {
        granted.extend(ALL_RIGHTS.iter().map(|r| r.to_string()));
        granted = normalize_all(granted);
    }
    granted
}

/// True if `granted` allows `right`; OWNER allows everything
pub fn allows(granted: &[String], right: &str) -> bool {
    let wanted = normalize(right);
    granted.iter().any(|g| *g == wanted || g == OWNER)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Viewer,
    Reviewer,
    Author,
    CoOwner,
}

impl Role {
    pub fn rights(self) -> &'static [&'static str] {
        match self {
            Role::Viewer => &[VIEW, VIEW_RIGHTS_DATA, OBJECT_MODEL],
            Role::Reviewer => &[VIEW, VIEW_RIGHTS_DATA, OBJECT_MODEL, EDIT, DOCEDIT, REPLY, REPLY_ALL, FORWARD],
            Role::Author => &[
                VIEW,
                VIEW_RIGHTS_DATA,
                OBJECT_MODEL,
                EDIT,
                DOCEDIT,
                REPLY,
                REPLY_ALL,
                FORWARD,
                EXTRACT,
                PRINT,
                COMMENT,
            ],
            Role::CoOwner => &ALL_RIGHTS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "Viewer",
            Role::Reviewer => "Reviewer",
            Role::Author => "Author",
            Role::CoOwner => "CoOwner",
        }
    }
}

impl FromStr for Role {
    type Err = MipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Role::Viewer, Role::Reviewer, Role::Author, Role::CoOwner]
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MipError::bad_input(format!("Unknown role: {}", s)))
    }
}
