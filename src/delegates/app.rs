//! Wrappers for delegates handed in by the host application
//!
//! Anything the application's implementation returns as an error reaches
//! SDK callers as [`ErrorKind::DelegateResponse`](crate::ErrorKind::DelegateResponse)
//! with the original error attached. Built-in delegates are never wrapped.

use std::path::Path;
use std::sync::Arc;

use crate::async_op::OperationContext;
use crate::delegates::{
    from_delegate, DelegateResponse, HttpCallback, HttpDelegate, HttpOperation, HttpRequest,
    JsonDelegate, JsonDocument, MipComponent, StorageDelegate, StorageSettings, StorageTable,
    XmlDelegate, XmlDocument, XmlReader,
};

pub(crate) struct ApplicationStorage(Arc<dyn StorageDelegate>);

impl ApplicationStorage {
    pub fn wrap(inner: Arc<dyn StorageDelegate>) -> Arc<dyn StorageDelegate> {
        Arc::new(Self(inner))
    }
}

impl StorageDelegate for ApplicationStorage {
    fn create_storage_table(
        &self,
        path: &Path,
        component: MipComponent,
        table_name: &str,
        all_columns: &[&str],
        encrypted_columns: &[&str],
        key_columns: &[&str],
    ) -> DelegateResponse<Arc<dyn StorageTable>> {
        let table = self
            .0
            .create_storage_table(path, component, table_name, all_columns, encrypted_columns, key_columns)
            .map_err(from_delegate)?;
        Ok(Arc::new(ApplicationTable(table)))
    }

    fn storage_settings(&self) -> StorageSettings {
        self.0.storage_settings()
    }
}

struct ApplicationTable(Arc<dyn StorageTable>);

impl StorageTable for ApplicationTable {
    fn insert(&self, values: &[&str]) -> DelegateResponse<()> {
        self.0.insert(values).map_err(from_delegate)
    }

    fn list(&self) -> DelegateResponse<Vec<Vec<String>>> {
        self.0.list().map_err(from_delegate)
    }

    fn update(
        &self,
        update_columns: &[&str],
        update_values: &[&str],
        query_columns: &[&str],
        query_values: &[&str],
    ) -> DelegateResponse<usize> {
        self.0
            .update(update_columns, update_values, query_columns, query_values)
            .map_err(from_delegate)
    }

    fn delete(&self, query_columns: &[&str], query_values: &[&str]) -> DelegateResponse<usize> {
        self.0.delete(query_columns, query_values).map_err(from_delegate)
    }

    fn find(
        &self,
        query_columns: &[&str],
        query_values: &[&str],
    ) -> DelegateResponse<Vec<Vec<String>>> {
        self.0.find(query_columns, query_values).map_err(from_delegate)
    }
}

pub(crate) struct ApplicationHttp(Arc<dyn HttpDelegate>);

impl ApplicationHttp {
    pub fn wrap(inner: Arc<dyn HttpDelegate>) -> Arc<dyn HttpDelegate> {
        Arc::new(Self(inner))
    }
}

impl HttpDelegate for ApplicationHttp {
    fn send(
        &self,
        request: &HttpRequest,
        context: Option<&OperationContext>,
    ) -> DelegateResponse<HttpOperation> {
        self.0.send(request, context).map_err(from_delegate)
    }

    fn send_async(
        &self,
        request: HttpRequest,
        context: Option<OperationContext>,
        callback: HttpCallback,
    ) -> HttpOperation {
        self.0.send_async(
            request,
            context,
            Box::new(move |result| callback(result.map_err(from_delegate))),
        )
    }

    fn cancel_operation(&self, request_id: &str) {
        self.0.cancel_operation(request_id)
    }

    fn cancel_all_operations(&self) {
        self.0.cancel_all_operations()
    }
}

pub(crate) struct ApplicationJson(Arc<dyn JsonDelegate>);

impl ApplicationJson {
    pub fn wrap(inner: Arc<dyn JsonDelegate>) -> Arc<dyn JsonDelegate> {
        Arc::new(Self(inner))
    }
}

impl JsonDelegate for ApplicationJson {
    fn create_json_object_document(&self) -> DelegateResponse<JsonDocument> {
        self.0.create_json_object_document().map_err(from_delegate)
    }

    fn parse(&self, value: &str) -> DelegateResponse<JsonDocument> {
        self.0.parse(value).map_err(from_delegate)
    }
}

pub(crate) struct ApplicationXml(Arc<dyn XmlDelegate>);

impl ApplicationXml {
    pub fn wrap(inner: Arc<dyn XmlDelegate>) -> Arc<dyn XmlDelegate> {
        Arc::new(Self(inner))
    }
}

impl XmlDelegate for ApplicationXml {
    fn create_xml_reader(&self, input: &str) -> DelegateResponse<XmlReader> {
        self.0.create_xml_reader(input).map_err(from_delegate)
    }

    fn parse_data(&self, data: &str) -> DelegateResponse<XmlDocument> {
        self.0.parse_data(data).map_err(from_delegate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegates::{InMemoryStorageDelegate, OfflineHttpDelegate, SerdeJsonDelegate};
    use crate::error::{ErrorKind, MipError};
    use std::sync::mpsc;

    struct BrokenTables;

    impl StorageTable for BrokenTables {
        fn insert(&self, _values: &[&str]) -> DelegateResponse<()> {
            Err(MipError::internal("disk full"))
        }
        fn list(&self) -> DelegateResponse<Vec<Vec<String>>> {
            Ok(Vec::new())
        }
        fn update(&self, _: &[&str], _: &[&str], _: &[&str], _: &[&str]) -> DelegateResponse<usize> {
            Err(MipError::internal("disk full"))
        }
        fn delete(&self, _: &[&str], _: &[&str]) -> DelegateResponse<usize> {
            Err(MipError::internal("disk full"))
        }
        fn find(&self, _: &[&str], _: &[&str]) -> DelegateResponse<Vec<Vec<String>>> {
            Err(MipError::internal("disk full"))
        }
    }

    struct BrokenStorage;

    impl StorageDelegate for BrokenStorage {
        fn create_storage_table(
            &self,
            _: &Path,
            _: MipComponent,
            _: &str,
            _: &[&str],
            _: &[&str],
            _: &[&str],
        ) -> DelegateResponse<Arc<dyn StorageTable>> {
            Ok(Arc::new(BrokenTables))
        }
    }

    #[test]
    fn test_table_errors_become_delegate_responses() -> DelegateResponse<()> {
        let storage = ApplicationStorage::wrap(Arc::new(BrokenStorage));
        let table = storage.create_storage_table(
            Path::new("/mip"),
            MipComponent::Protection,
            "t",
            &["k"],
            &[],
            &["k"],
        )?;
        assert!(table.list()?.is_empty());
        let err = table.insert(&["v"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DelegateResponse);
        assert_eq!(err.message(), "disk full");
        let cause = err.delegate_source().map(|e| e.to_string());
        assert_eq!(cause.as_deref(), Some("disk full"));
        Ok(())
    }

    #[test]
    fn test_wrapped_builtin_storage_keeps_working() -> DelegateResponse<()> {
        let storage = ApplicationStorage::wrap(Arc::new(InMemoryStorageDelegate::default()));
        let table = storage.create_storage_table(
            Path::new("/mip"),
            MipComponent::Policy,
            "t",
            &["k", "v"],
            &["v"],
            &["k"],
        )?;
        table.insert(&["a", "1"])?;
        assert_eq!(table.find(&["k"], &["a"])?, vec![vec!["a".to_string(), "1".to_string()]]);
        let err = table.find(&["missing"], &["a"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DelegateResponse);
        Ok(())
    }

    #[test]
    fn test_http_failures_reclassified_for_sync_and_callback() {
        let http = ApplicationHttp::wrap(Arc::new(OfflineHttpDelegate));
        let request = HttpRequest::get("https://example.com/x");
        let err = http.send(&request, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DelegateResponse);

        let (tx, rx) = mpsc::channel();
        http.send_async(
            request,
            None,
            Box::new(move |result| {
                let _ = tx.send(result.map_err(|e| e.kind()));
            }),
        );
        assert_eq!(rx.recv().ok(), Some(Err(ErrorKind::DelegateResponse)));
    }

    #[test]
    fn test_json_parse_failure_reclassified() {
        let json = ApplicationJson::wrap(Arc::new(SerdeJsonDelegate));
        assert!(json.create_json_object_document().is_ok());
        let err = json.parse("{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DelegateResponse);
    }
}
