use anyhow::anyhow;
use reqwest::StatusCode;

/// Domain errors surfaced to library users and mapped to CLI messages.
///
/// Operations return `anyhow::Result`; these values travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref::<Error>()`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    ProductNotFound(String),
    #[error("{0}")]
    DatasetNotFound(String),
    #[error("{0}")]
    DatasetVersionNotFound(String),
    #[error("{0}")]
    DatasetVersionPartNotFound(String),
    #[error("{0}")]
    ServiceNotAvailable(String),
    #[error("{0}")]
    ServiceNotSupported(String),
    #[error("{0}")]
    InvalidUsernameOrPassword(String),
    #[error("{0}")]
    CouldNotConnectToAuthenticationSystem(String),
    #[error("{0}")]
    CredentialsCannotBeNone(String),
    #[error("{0}")]
    CoordinatesOutOfDatasetBounds(String),
    #[error("{0}")]
    VariableDoesNotExistInTheDataset(String),
    #[error("{0}")]
    MinimumLongitudeGreaterThanMaximumLongitude(String),
    #[error("{0}")]
    MinimumLatitudeGreaterThanMaximumLatitude(String),
    #[error("{0}")]
    MinimumDepthGreaterThanMaximumDepth(String),
    #[error("{0}")]
    StartDatetimeAfterEndDatetime(String),
    #[error("{0}")]
    WrongDatetimeFormat(String),
    #[error("{0}")]
    MutuallyExclusiveArguments(String),
    #[error("{0}")]
    SyncRequiresDatasetVersion(String),
    #[error("{0}")]
    IncorrectFileListExtension(String),
    #[error("{0}")]
    FormatNotSupported(String),
    #[error("{0}")]
    DatasetUpdating(String),
    #[error("{0}")]
    WrongFieldsError(String),
    #[error("{0}")]
    NoDataToDownload(String),
}

impl Error {
    /// The variant name, e.g. `DatasetNotFound`.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ProductNotFound(_) => "ProductNotFound",
            Error::DatasetNotFound(_) => "DatasetNotFound",
            Error::DatasetVersionNotFound(_) => "DatasetVersionNotFound",
            Error::DatasetVersionPartNotFound(_) => "DatasetVersionPartNotFound",
            Error::ServiceNotAvailable(_) => "ServiceNotAvailable",
            Error::ServiceNotSupported(_) => "ServiceNotSupported",
            Error::InvalidUsernameOrPassword(_) => "InvalidUsernameOrPassword",
            Error::CouldNotConnectToAuthenticationSystem(_) => {
                "CouldNotConnectToAuthenticationSystem"
            }
            Error::CredentialsCannotBeNone(_) => "CredentialsCannotBeNone",
            Error::CoordinatesOutOfDatasetBounds(_) => "CoordinatesOutOfDatasetBounds",
            Error::VariableDoesNotExistInTheDataset(_) => "VariableDoesNotExistInTheDataset",
            Error::MinimumLongitudeGreaterThanMaximumLongitude(_) => {
                "MinimumLongitudeGreaterThanMaximumLongitude"
            }
            Error::MinimumLatitudeGreaterThanMaximumLatitude(_) => {
                "MinimumLatitudeGreaterThanMaximumLatitude"
            }
            Error::MinimumDepthGreaterThanMaximumDepth(_) => "MinimumDepthGreaterThanMaximumDepth",
            Error::StartDatetimeAfterEndDatetime(_) => "StartDatetimeAfterEndDatetime",
            Error::WrongDatetimeFormat(_) => "WrongDatetimeFormat",
            Error::MutuallyExclusiveArguments(_) => "MutuallyExclusiveArguments",
            Error::SyncRequiresDatasetVersion(_) => "SyncRequiresDatasetVersion",
            Error::IncorrectFileListExtension(_) => "IncorrectFileListExtension",
            Error::FormatNotSupported(_) => "FormatNotSupported",
            Error::DatasetUpdating(_) => "DatasetUpdating",
            Error::WrongFieldsError(_) => "WrongFieldsError",
            Error::NoDataToDownload(_) => "NoDataToDownload",
        }
    }

    /// Human readable headline derived from the variant name.
    pub fn sentence(&self) -> String {
        camel_case_to_sentence(self.kind())
    }
}

/// `DatasetVersionNotFound` -> `Dataset version not found`.
pub fn camel_case_to_sentence(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 8);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i == 0 {
                out.push(c);
            } else {
                out.push(' ');
                out.extend(c.to_lowercase());
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ServerErrorResponse {
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
    // S3 gateways and keycloak answer with {"error": ..., "error_description": ...}
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) error_description: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

pub(crate) fn format_server_error(
    status: StatusCode,
    url: &str,
    e: &ServerErrorResponse,
) -> anyhow::Error {
    let title = e
        .title
        .as_deref()
        .or(e.message.as_deref())
        .or(e.error.as_deref())
        .unwrap_or("");
    let detail = e
        .detail
        .as_deref()
        .or(e.error_description.as_deref())
        .unwrap_or("");

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return anyhow!(
            "Copernicus Marine authentication/authorization failed (HTTP {}).\n- Check your username and password (run `copernicusmarine login`)\n- Credentials are read from arguments, COPERNICUSMARINE_SERVICE_USERNAME/PASSWORD or ~/.copernicusmarine/.copernicusmarine-credentials\n\nServer message: {}\n{}\nrequest: {}",
            status.as_u16(),
            title,
            detail,
            url
        );
    }

    if status == StatusCode::NOT_FOUND {
        return anyhow!(
            "Copernicus Marine resource not found (HTTP 404).\n- The metadata may have moved, or the dataset is not published yet\n- Try again without the metadata cache (--overwrite-metadata-cache)\n\nServer message: {}\n{}\nrequest: {}",
            title,
            detail,
            url
        );
    }

    anyhow!(
        "request failed: HTTP {} for url ({})\n{}\n{}",
        status.as_u16(),
        url,
        title,
        detail
    )
}
