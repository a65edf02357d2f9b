use crate::common::virtual_network::VirtualSystem;

/// 1 - 2 - 3
pub fn vnet_line() -> VirtualSystem {
    VirtualSystem::create(&[1, 2, 3], &[(0, 1, 2), (1, 2, 3)])
}

/// 1 - 2 - 3 - 4
pub fn vnet_chain() -> VirtualSystem {
    VirtualSystem::create(&[1, 2, 3, 4], &[(0, 1, 2), (1, 2, 3), (2, 3, 4)])
}

/// Two paths from 1 to 3: through 2, or the longer one through 4 and 5
pub fn vnet_detour() -> VirtualSystem {
    VirtualSystem::create(
        &[1, 2, 3, 4, 5],
        &[
            (0, 1, 2),
            (1, 2, 3),
            (2, 1, 4),
            (3, 4, 5),
            (4, 5, 3),
        ],
    )
}
