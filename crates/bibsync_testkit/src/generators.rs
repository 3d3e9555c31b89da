//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, libraries, sync errors and raw
//! failures that the classifier accepts.

use bibsync_store::LibraryId;
use bibsync_sync_protocol::{
    Classified, ErrorData, Failure, Fatal, HttpFailure, LocalFailure, NonFatal,
    PreconditionErrorType, SyncActionError, SyncError, TransportFailure,
};
use proptest::prelude::*;

/// Strategy for generating object keys in the server's key alphabet.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[23456789ABCDEFGHIJKLMNPQRSTUVWXYZ]{8}").expect("Invalid regex")
}

/// Strategy for generating library ids.
pub fn library_id_strategy() -> impl Strategy<Value = LibraryId> {
    prop_oneof![Just(LibraryId::User), (1u64..10_000).prop_map(LibraryId::Group)]
}

/// Strategy for generating error scopes.
pub fn error_data_strategy() -> impl Strategy<Value = ErrorData> {
    (
        prop::option::of(prop::collection::vec(key_strategy(), 0..4)),
        prop::option::of(library_id_strategy()),
    )
        .prop_map(|(item_keys, library_id)| ErrorData {
            item_keys,
            library_id,
        })
}

fn message_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z ]{0,24}").expect("Invalid regex")
}

/// Strategy for generating fatal errors.
pub fn fatal_strategy() -> impl Strategy<Value = Fatal> {
    prop_oneof![
        Just(Fatal::NoInternetConnection),
        (message_strategy(), error_data_strategy())
            .prop_map(|(response, data)| Fatal::ApiError { response, data }),
        message_strategy().prop_map(|message| Fatal::DbError { message }),
        Just(Fatal::GroupSyncFailed),
        Just(Fatal::AllLibrariesFetchFailed),
        Just(Fatal::UploadObjectConflict),
        Just(Fatal::PermissionLoadingFailed),
        Just(Fatal::MissingGroupPermissions),
        Just(Fatal::Cancelled),
        Just(Fatal::PreconditionErrorCantBeResolved),
        Just(Fatal::CantResolveConflict),
        Just(Fatal::ServiceUnavailable),
    ]
}

/// Strategy for generating non-fatal errors.
pub fn non_fatal_strategy() -> impl Strategy<Value = NonFatal> {
    prop_oneof![
        library_id_strategy().prop_map(NonFatal::VersionMismatch),
        (message_strategy(), error_data_strategy())
            .prop_map(|(response, data)| NonFatal::ApiError { response, data }),
        message_strategy().prop_map(NonFatal::Unknown),
        library_id_strategy().prop_map(NonFatal::QuotaLimit),
        Just(NonFatal::Unchanged),
        (key_strategy(), library_id_strategy(), message_strategy()).prop_map(
            |(key, library_id, title)| NonFatal::AttachmentMissing {
                key,
                library_id,
                title,
            }
        ),
        (message_strategy(), library_id_strategy()).prop_map(|(message, library_id)| {
            NonFatal::AnnotationDidSplit {
                message,
                library_id,
            }
        }),
        Just(NonFatal::InsufficientSpace),
        (0usize..100, message_strategy())
            .prop_map(|(count, library)| NonFatal::WebDavDeletion { count, library }),
    ]
}

/// Strategy for generating sync errors of either severity.
pub fn sync_error_strategy() -> impl Strategy<Value = SyncError> {
    prop_oneof![
        fatal_strategy().prop_map(SyncError::Fatal),
        non_fatal_strategy().prop_map(SyncError::NonFatal),
    ]
}

/// Strategy for generating action errors.
pub fn action_error_strategy() -> impl Strategy<Value = SyncActionError> {
    prop_oneof![
        Just(SyncActionError::AttachmentItemNotSubmitted),
        Just(SyncActionError::AttachmentAlreadyUploaded),
        message_strategy().prop_map(SyncActionError::SubmitUpdateFailures),
        (key_strategy(), library_id_strategy(), message_strategy()).prop_map(
            |(key, library_id, title)| SyncActionError::AttachmentMissing {
                key,
                library_id,
                title,
            }
        ),
    ]
}

/// Strategy for generating already classified outcomes.
pub fn classified_strategy() -> impl Strategy<Value = Classified> {
    prop_oneof![
        sync_error_strategy().prop_map(Classified::Sync),
        action_error_strategy().prop_map(Classified::Action),
        prop_oneof![
            Just(PreconditionErrorType::ObjectConflict),
            Just(PreconditionErrorType::LibraryConflict),
        ]
        .prop_map(Classified::Precondition),
    ]
}

/// Strategy for generating raw HTTP error responses.
pub fn http_failure_strategy(api_base_url: &'static str) -> impl Strategy<Value = HttpFailure> {
    (
        prop_oneof![
            Just(400u16),
            Just(403),
            Just(404),
            Just(409),
            Just(412),
            Just(413),
            Just(428),
            Just(500),
            Just(503),
        ],
        prop_oneof![
            Just(format!("{api_base_url}/users/7/items")),
            Just("https://dav.test.invalid/zotero/FILE2345.zip".to_string()),
        ],
        message_strategy(),
    )
        .prop_map(|(status, url, body)| HttpFailure::new(status, url, body))
}

/// Strategy for generating any failure the classifier accepts.
pub fn failure_strategy(api_base_url: &'static str) -> impl Strategy<Value = Failure> {
    prop_oneof![
        classified_strategy().prop_map(Failure::Classified),
        message_strategy().prop_map(|m| Failure::Transport(TransportFailure::NoConnection(m))),
        Just(Failure::Transport(TransportFailure::TimedOut)),
        http_failure_strategy(api_base_url).prop_map(Failure::Http),
        prop_oneof![
            message_strategy().prop_map(LocalFailure::Store),
            Just(LocalFailure::InsufficientSpace),
            message_strategy().prop_map(LocalFailure::Other),
        ]
        .prop_map(Failure::Local),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_sync_protocol::{classify, ErrorContext};

    const API: &str = "https://api.test.invalid";

    proptest! {
        #[test]
        fn generated_keys_are_valid(key in key_strategy()) {
            prop_assert!(bibsync_sync_engine::is_valid_key(&key));
        }

        #[test]
        fn classification_is_idempotent(
            failure in failure_strategy(API),
            library in prop::option::of(library_id_strategy()),
        ) {
            let context = match library {
                Some(id) => ErrorContext::library(id, API),
                None => ErrorContext::global(API),
            };
            let once = classify(failure, &context);
            let twice = classify(Failure::Classified(once.clone()), &context);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn library_scoped_http_errors_are_not_fatal_except_unavailable(
            http in http_failure_strategy(API),
            library in library_id_strategy(),
        ) {
            let status = http.status;
            let classified = classify(Failure::Http(http), &ErrorContext::library(library, API));
            prop_assert_eq!(classified.is_fatal(), status == 503);
        }

        #[test]
        fn sync_errors_have_one_severity(error in sync_error_strategy()) {
            prop_assert!(error.fatal().is_some() != error.non_fatal().is_some());
        }
    }
}
