//! Enumeration cursors that use pull operations when the server supports
//! them and fall back to the traditional operations otherwise.

use std::collections::VecDeque;
use std::fmt;

use cim_types::{CimClass, CimClassName, CimInstance, CimInstanceName, ObjectPath};
use cimxml::CimStatus;
use tracing::{debug, info, warn};

use crate::capability::PullFamily;
use crate::connection::WbemConnection;
use crate::error::Error;
use crate::operations::AssociatedObject;
use crate::options::{
    AssociatorsOptions, EnumerateInstancesOptions, IterOptions, OpenOptions, ReferencesOptions,
};
use crate::pull::{EnumerationContext, PullResult};

type PullFn<T> = fn(&mut WbemConnection, EnumerationContext, Option<u32>) -> Result<PullResult<T>, Error>;

/// Status codes that mean "pull operations are not implemented". Some
/// servers answer CIM_ERR_FAILED instead of CIM_ERR_NOT_SUPPORTED.
fn pull_unsupported(err: &Error) -> bool {
    err.cim_status()
        .map(|status| matches!(status.status, CimStatus::NotSupported | CimStatus::Failed))
        .unwrap_or(false)
}

/// Batches of one enumeration.
///
/// Dropping a cursor whose server-side session is still open closes that
/// session.
pub struct EnumerationCursor<'c, T> {
    conn: &'c mut WbemConnection,
    pending: VecDeque<T>,
    context: Option<EnumerationContext>,
    pull: Option<PullFn<T>>,
    max_object_count: u32,
    query_result_class: Option<CimClass>,
}

impl<T> fmt::Debug for EnumerationCursor<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnumerationCursor")
            .field("conn_id", &self.conn.conn_id())
            .field("pending", &self.pending.len())
            .field("context", &self.context)
            .field("pulled", &self.pull.is_some())
            .finish()
    }
}

impl<'c, T> EnumerationCursor<'c, T> {
    fn pulled(
        conn: &'c mut WbemConnection,
        first: PullResult<T>,
        pull: PullFn<T>,
        max_object_count: u32,
        query_result_class: Option<CimClass>,
    ) -> Self {
        Self {
            conn,
            pending: first.items.into(),
            context: first.context,
            pull: Some(pull),
            max_object_count,
            query_result_class,
        }
    }

    fn complete(conn: &'c mut WbemConnection, items: Vec<T>) -> Self {
        Self {
            conn,
            pending: items.into(),
            context: None,
            pull: None,
            max_object_count: 0,
            query_result_class: None,
        }
    }

    /// Whether the enumeration runs over pull operations.
    pub fn is_pulled(&self) -> bool {
        self.pull.is_some()
    }

    /// More items are buffered or the server session is still open.
    pub fn has_next_batch(&self) -> bool {
        !self.pending.is_empty() || self.context.is_some()
    }

    /// Class describing query results, if the server returned one.
    pub fn query_result_class(&self) -> Option<&CimClass> {
        self.query_result_class.as_ref()
    }

    fn fetch(&mut self) -> Result<Vec<T>, Error> {
        let (Some(context), Some(pull)) = (self.context.clone(), self.pull) else {
            return Ok(Vec::new());
        };
        // Kept until the pull succeeds; a failed pull leaves it for close/drop.
        let batch = pull(&mut *self.conn, context, Some(self.max_object_count))?;
        self.context = batch.context;
        Ok(batch.items)
    }

    /// Buffered items, or the next batch from the server. `None` once the
    /// enumeration is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Vec<T>>, Error> {
        if !self.pending.is_empty() {
            return Ok(Some(self.pending.drain(..).collect()));
        }
        if self.context.is_none() {
            return Ok(None);
        }
        self.fetch().map(Some)
    }

    /// Close the server session, if one is still open.
    pub fn close(mut self) -> Result<(), Error> {
        self.pending.clear();
        match self.context.take() {
            Some(context) => self.conn.close_enumeration(context),
            None => Ok(()),
        }
    }
}

impl<T> Iterator for EnumerationCursor<'_, T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(Ok(item));
            }
            self.context.as_ref()?;
            // Servers may answer a pull with an empty batch and eos false.
            match self.fetch() {
                Ok(items) => self.pending.extend(items),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl<T> Drop for EnumerationCursor<'_, T> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            debug!(context = context.context(), "closing abandoned enumeration");
            if let Err(err) = self.conn.close_enumeration(context) {
                warn!(conn_id = self.conn.conn_id(), error = %err, "failed to close enumeration");
            }
        }
    }
}

/// Options the traditional operations cannot honor.
fn check_traditional(family: PullFamily, options: &IterOptions) -> Result<(), Error> {
    let unsupported = if options.filter_query_language.is_some() || options.filter_query.is_some() {
        Some("filtering")
    } else if options.continue_on_error == Some(true) {
        Some("continue on error")
    } else {
        None
    };
    match unsupported {
        Some(what) => Err(Error::value(format!(
            "{what} was requested but {family} is not used on this connection"
        ))),
        None => Ok(()),
    }
}

impl WbemConnection {
    /// Open with pull operations if allowed, else run the traditional
    /// operation. The capability flag of `family` only moves away from
    /// unknown.
    fn iterate<T, O, F>(
        &mut self,
        family: PullFamily,
        options: &IterOptions,
        pull: PullFn<T>,
        open: O,
        traditional: F,
    ) -> Result<EnumerationCursor<'_, T>, Error>
    where
        O: FnOnce(&mut Self, &OpenOptions) -> Result<(PullResult<T>, Option<CimClass>), Error>,
        F: FnOnce(&mut Self) -> Result<Vec<T>, Error>,
    {
        if options.max_object_count == 0 {
            return Err(Error::value("MaxObjectCount must be a positive integer"));
        }
        let flag = self.capabilities.get(family);
        if flag != Some(false) {
            match open(self, &options.open_options()) {
                Ok((first, query_result_class)) => {
                    self.capabilities.set(family, Some(true));
                    return Ok(EnumerationCursor::pulled(
                        self,
                        first,
                        pull,
                        options.max_object_count,
                        query_result_class,
                    ));
                }
                Err(err) if flag.is_none() && pull_unsupported(&err) => {
                    info!(conn_id = self.conn_id(), %family, error = %err, "pull operations not supported, using traditional operations");
                    self.capabilities.set(family, Some(false));
                }
                Err(err) => return Err(err),
            }
        }
        check_traditional(family, options)?;
        let items = traditional(self)?;
        Ok(EnumerationCursor::complete(self, items))
    }

    pub fn iter_enumerate_instances(
        &mut self,
        namespace: Option<&str>,
        class: impl Into<CimClassName>,
        options: &EnumerateInstancesOptions,
        iter: &IterOptions,
    ) -> Result<EnumerationCursor<'_, CimInstance>, Error> {
        let class = class.into();
        self.iterate(
            PullFamily::EnumerateInstances,
            iter,
            WbemConnection::pull_instances_with_path,
            |conn, open| {
                conn.open_enumerate_instances(namespace, class.clone(), options, open)
                    .map(|r| (r, None))
            },
            |conn| conn.enumerate_instances(namespace, class.clone(), options),
        )
    }

    pub fn iter_enumerate_instance_paths(
        &mut self,
        namespace: Option<&str>,
        class: impl Into<CimClassName>,
        iter: &IterOptions,
    ) -> Result<EnumerationCursor<'_, CimInstanceName>, Error> {
        let class = class.into();
        self.iterate(
            PullFamily::EnumerateInstancePaths,
            iter,
            WbemConnection::pull_instance_paths,
            |conn, open| {
                conn.open_enumerate_instance_paths(namespace, class.clone(), open)
                    .map(|r| (r, None))
            },
            |conn| conn.enumerate_instance_names(namespace, class.clone()),
        )
    }

    pub fn iter_associator_instances(
        &mut self,
        instance_name: &CimInstanceName,
        options: &AssociatorsOptions,
        iter: &IterOptions,
    ) -> Result<EnumerationCursor<'_, CimInstance>, Error> {
        self.iterate(
            PullFamily::AssociatorInstances,
            iter,
            WbemConnection::pull_instances_with_path,
            |conn, open| {
                conn.open_associator_instances(instance_name, options, open)
                    .map(|r| (r, None))
            },
            |conn| {
                let source = ObjectPath::Instance(instance_name.clone());
                conn.associators(&source, options)?
                    .into_iter()
                    .map(|object| only_instance("Associators", object))
                    .collect()
            },
        )
    }

    pub fn iter_associator_instance_paths(
        &mut self,
        instance_name: &CimInstanceName,
        options: &AssociatorsOptions,
        iter: &IterOptions,
    ) -> Result<EnumerationCursor<'_, CimInstanceName>, Error> {
        self.iterate(
            PullFamily::AssociatorInstancePaths,
            iter,
            WbemConnection::pull_instance_paths,
            |conn, open| {
                conn.open_associator_instance_paths(instance_name, options, open)
                    .map(|r| (r, None))
            },
            |conn| {
                let source = ObjectPath::Instance(instance_name.clone());
                conn.associator_names(&source, options)?
                    .into_iter()
                    .map(|path| only_instance_path("AssociatorNames", path))
                    .collect()
            },
        )
    }

    pub fn iter_reference_instances(
        &mut self,
        instance_name: &CimInstanceName,
        options: &ReferencesOptions,
        iter: &IterOptions,
    ) -> Result<EnumerationCursor<'_, CimInstance>, Error> {
        self.iterate(
            PullFamily::ReferenceInstances,
            iter,
            WbemConnection::pull_instances_with_path,
            |conn, open| {
                conn.open_reference_instances(instance_name, options, open)
                    .map(|r| (r, None))
            },
            |conn| {
                let source = ObjectPath::Instance(instance_name.clone());
                conn.references(&source, options)?
                    .into_iter()
                    .map(|object| only_instance("References", object))
                    .collect()
            },
        )
    }

    pub fn iter_reference_instance_paths(
        &mut self,
        instance_name: &CimInstanceName,
        options: &ReferencesOptions,
        iter: &IterOptions,
    ) -> Result<EnumerationCursor<'_, CimInstanceName>, Error> {
        self.iterate(
            PullFamily::ReferenceInstancePaths,
            iter,
            WbemConnection::pull_instance_paths,
            |conn, open| {
                conn.open_reference_instance_paths(instance_name, options, open)
                    .map(|r| (r, None))
            },
            |conn| {
                let source = ObjectPath::Instance(instance_name.clone());
                conn.reference_names(&source, options)?
                    .into_iter()
                    .map(|path| only_instance_path("ReferenceNames", path))
                    .collect()
            },
        )
    }

    /// Query results. The traditional fallback cannot return the query
    /// result class, so requesting it there is an error.
    pub fn iter_query_instances(
        &mut self,
        namespace: Option<&str>,
        query_language: &str,
        query: &str,
        return_query_result_class: Option<bool>,
        iter: &IterOptions,
    ) -> Result<EnumerationCursor<'_, CimInstance>, Error> {
        self.iterate(
            PullFamily::QueryInstances,
            iter,
            WbemConnection::pull_instances,
            |conn, open| {
                conn.open_query_instances(namespace, query_language, query, return_query_result_class, open)
                    .map(|q| (q.result, q.query_result_class))
            },
            |conn| {
                if return_query_result_class == Some(true) {
                    return Err(Error::value(
                        "ReturnQueryResultClass was requested but OpenQueryInstances is not used on this connection",
                    ));
                }
                conn.exec_query(namespace, query_language, query)
            },
        )
    }
}

fn only_instance(method: &str, object: AssociatedObject) -> Result<CimInstance, Error> {
    match object {
        AssociatedObject::Instance(instance) => Ok(instance),
        AssociatedObject::Class(path, _) => Err(Error::cimxml(format!(
            "{method} response contains class {path} for an instance source"
        ))),
    }
}

fn only_instance_path(method: &str, path: ObjectPath) -> Result<CimInstanceName, Error> {
    match path {
        ObjectPath::Instance(path) => Ok(path),
        ObjectPath::Class(path) => Err(Error::cimxml(format!(
            "{method} response contains class path {path} for an instance source"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CimStatusError, ErrorKind};

    #[test]
    fn not_supported_and_failed_mean_no_pull() {
        let cim = |status| Error::from(ErrorKind::Cim(CimStatusError::new(status, None)));
        assert!(pull_unsupported(&cim(CimStatus::NotSupported)));
        assert!(pull_unsupported(&cim(CimStatus::Failed)));
        assert!(!pull_unsupported(&cim(CimStatus::AccessDenied)));
        assert!(!pull_unsupported(&Error::value("x")));
    }

    #[test]
    fn traditional_path_rejects_pull_only_options() {
        let plain = IterOptions::default();
        assert!(check_traditional(PullFamily::EnumerateInstances, &plain).is_ok());

        let filtered = IterOptions {
            filter_query: Some("SELECT * FROM CIM_Foo".into()),
            ..IterOptions::default()
        };
        let err = check_traditional(PullFamily::EnumerateInstances, &filtered).unwrap_err();
        assert!(err.to_string().contains("filtering"));

        let continuing = IterOptions {
            continue_on_error: Some(true),
            ..IterOptions::default()
        };
        assert!(check_traditional(PullFamily::QueryInstances, &continuing).is_err());

        let not_continuing = IterOptions {
            continue_on_error: Some(false),
            ..IterOptions::default()
        };
        assert!(check_traditional(PullFamily::QueryInstances, &not_continuing).is_ok());
    }
}
