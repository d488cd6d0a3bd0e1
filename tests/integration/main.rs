mod providers_test;
mod reconcile_test;
#[cfg(feature = "integration-tests")]
mod sandbox_test;
mod test_utils;
