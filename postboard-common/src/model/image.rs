//! Rules for accepting uploaded image files.

use std::fmt::{Display, Formatter};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

pub const ALLOWED_IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// File name of an uploaded image, safe to join onto the upload directory.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct ImageFileName(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The image file name is not sanitized: {0:?}")]
pub struct InvalidImageFileNameError(String);

impl ImageFileName {
    /// Accepts a stored name only if sanitizing would leave it unchanged.
    pub fn new(name: String) -> Result<Self, InvalidImageFileNameError> {
        if !name.is_empty() && secure_filename(&name) == name {
            Ok(Self(name))
        } else {
            Err(InvalidImageFileNameError(name))
        }
    }

    /// Returns `None` for disallowed extensions and names that sanitize to nothing.
    #[must_use]
    pub fn from_upload(original: &str) -> Option<Self> {
        if !has_allowed_extension(original) {
            return None;
        }

        let sanitized = secure_filename(original);
        (!sanitized.is_empty()).then_some(Self(sanitized))
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for ImageFileName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[must_use]
pub fn has_allowed_extension(file_name: &str) -> bool {
    file_name.rsplit_once('.').is_some_and(|(_, extension)| {
        let extension = extension.to_ascii_lowercase();
        ALLOWED_IMAGE_EXTENSIONS.contains(&extension.as_str())
    })
}

/// Reduces a client supplied file name to `[A-Za-z0-9_.-]`.
///
/// The name is NFKD-decomposed first so `é` keeps its `e`. Anything still
/// non-ASCII is dropped. Path separators and whitespace runs become a single
/// `_`. Leading and trailing `.` and `_` are trimmed so the result can never
/// name a parent directory or a hidden file.
#[must_use]
pub fn secure_filename(file_name: &str) -> String {
    let ascii: String = file_name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_ascii_whitespace().collect::<Vec<_>>().join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_owned()
}

#[cfg(test)]
mod tests {
    use crate::model::image::{ImageFileName, has_allowed_extension, secure_filename};

    #[test]
    fn allowed_extensions() {
        assert!(has_allowed_extension("cat.png"));
        assert!(has_allowed_extension("cat.JPG"));
        assert!(has_allowed_extension("archive.tar.gif"));
        assert!(!has_allowed_extension("cat.bmp"));
        assert!(!has_allowed_extension("png"));
        assert!(!has_allowed_extension("cat.png.exe"));
        assert!(!has_allowed_extension(""));
    }

    #[test]
    fn sanitizes_like_a_web_framework_would() {
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("..\\windows\\cat.png"), "windows_cat.png");
        assert_eq!(secure_filename("  spaced   out .gif"), "spaced_out_.gif");
        assert_eq!(secure_filename("fancy€name!.jpg"), "fancyname.jpg");
        assert_eq!(secure_filename("._hidden.png"), "hidden.png");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn accented_names_keep_their_letters() {
        assert_eq!(secure_filename("café.png"), "cafe.png");
        assert_eq!(secure_filename("naïve résumé.jpg"), "naive_resume.jpg");
        assert_eq!(secure_filename("ｆｕｌｌｗｉｄｔｈ.gif"), "fullwidth.gif");
        assert_eq!(
            ImageFileName::from_upload("Ærøskøbing café.PNG").map(ImageFileName::into_inner),
            Some("rskbing_cafe.PNG".to_owned())
        );
    }

    #[test]
    fn upload_names() {
        assert_eq!(
            ImageFileName::from_upload("../holiday photo.PNG").map(ImageFileName::into_inner),
            Some("holiday_photo.PNG".to_owned())
        );
        assert_eq!(ImageFileName::from_upload("notes.txt"), None);
        assert_eq!(ImageFileName::from_upload(""), None);
    }

    #[test]
    fn stored_names_must_be_sanitized() {
        assert!(ImageFileName::new("cat.png".to_owned()).is_ok());
        assert!(ImageFileName::new("../cat.png".to_owned()).is_err());
        assert!(ImageFileName::new(String::new()).is_err());
    }
}
