//! Pool contract interface. Only the function/event surface is consumed here;
//! storage, accounting and proof verification live on-chain.
use alloy::sol;

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IPrivacyPool {
        event Deposit(bytes32 indexed commitment, uint256 index, uint256 timestamp);
        event Withdrawal(bytes32 indexed nullifier, address indexed recipient, uint256 timestamp);

        function deposit(bytes32 commitment) external payable;

        function withdraw(
            uint256[2] pA,
            uint256[2][2] pB,
            uint256[2] pC,
            uint256[1] pubSignals,
            address recipient
        ) external;

        function getCommitmentsCount() external view returns (uint256);
        function getAllCommitments() external view returns (bytes32[]);
        function isNullifierUsed(bytes32 nullifier) external view returns (bool);
        function getBalance() external view returns (uint256);
        function DEPOSIT_AMOUNT() external view returns (uint256);
    }
}

