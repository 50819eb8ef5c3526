//! Two nodes, one Team: A (priority 10) leads, B (priority 5) follows,
//! and B falls back to LISTEN once A disappears.

use std::net::IpAddr;
use std::time::Duration;

use catbus_core::{ServiceKey, SERVICE_CONNECTED_TIMEOUT, SERVICE_LISTEN_TIMEOUT};
use catbus_services::ServiceState;
use catbus_test::ScenarioBuilder;

const A: usize = 0;
const B: usize = 1;

fn key() -> ServiceKey {
    ServiceKey::new(0x1234, 0x5678)
}

#[test]
fn test_two_node_failover() {
    let mut cluster = ScenarioBuilder::new().with_nodes(2).build();
    cluster.join_team(key(), &[10, 5]);

    assert!(cluster.run_until(Duration::from_secs(40), |c| c.converged(key()) == Some(A)));
    assert_eq!(cluster.node(A).state(key()), Some(ServiceState::Server));

    let b = cluster.node(B).status(key()).unwrap();
    assert_eq!(b.state, ServiceState::Connected);
    assert_eq!(b.server.map(|s| s.ip()), Some(IpAddr::V4(cluster.node(A).ip)));

    cluster.crash(A);
    let crashed_at = cluster.now();

    assert!(cluster.run_until(SERVICE_CONNECTED_TIMEOUT + Duration::from_secs(2), |c| {
        c.node(B).state(key()) == Some(ServiceState::Listen)
    }));
    assert!(cluster.now() - crashed_at <= SERVICE_CONNECTED_TIMEOUT + Duration::from_secs(2));

    let status = cluster.node(B).status(key()).unwrap();
    assert!(status.best.is_none());
    assert!(status.server.is_none());

    // alone, B sits out a whole listen window before electing itself
    cluster.run_for(SERVICE_LISTEN_TIMEOUT - Duration::from_secs(1));
    assert_eq!(cluster.node(B).state(key()), Some(ServiceState::Listen));

    assert!(cluster.run_until(Duration::from_secs(3), |c| {
        c.node(B).state(key()) == Some(ServiceState::Server)
    }));
}
