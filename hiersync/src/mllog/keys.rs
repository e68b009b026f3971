//! Event keys of the MLPerf logging format.

pub const BERT: &str = "bert";
pub const RESNET: &str = "resnet";

pub const INIT_START: &str = "init_start";
pub const INIT_STOP: &str = "init_stop";
pub const RUN_START: &str = "run_start";
pub const RUN_STOP: &str = "run_stop";
pub const EPOCH_START: &str = "epoch_start";
pub const EPOCH_STOP: &str = "epoch_stop";
pub const EVAL_START: &str = "eval_start";
pub const EVAL_STOP: &str = "eval_stop";
pub const SEED: &str = "seed";

pub const OPT_NAME: &str = "opt_name";
pub const GLOBAL_BATCH_SIZE: &str = "global_batch_size";
pub const OPT_BASE_LR: &str = "opt_base_learning_rate";
pub const OPT_END_LR: &str = "opt_end_learning_rate";
pub const OPT_LR_TRAINING_STEPS: &str = "opt_learning_rate_training_steps";
pub const OPT_LR_WARMUP_STEPS: &str = "opt_learning_rate_warmup_steps";
pub const OPT_LR_DECAY_STEPS: &str = "opt_learning_rate_decay_steps";
pub const NUM_WARMUP_STEPS: &str = "num_warmup_steps";
pub const START_WARMUP_STEP: &str = "start_warmup_step";
pub const OPT_WEIGHT_DECAY: &str = "opt_weight_decay";
pub const OPT_LAMB_EPSILON: &str = "opt_lamb_epsilon";
pub const OPT_LAMB_BETA_1: &str = "opt_lamb_beta_1";
pub const OPT_LAMB_BETA_2: &str = "opt_lamb_beta_2";
pub const LARS_EPSILON: &str = "lars_epsilon";
pub const LARS_OPT_LR_DECAY_POLY_POWER: &str = "lars_opt_learning_rate_decay_poly_power";
pub const LARS_OPT_MOMENTUM: &str = "lars_opt_momentum";

pub const NUMBER_OF_RANKS: &str = "number_of_ranks";
pub const NUMBER_OF_NODES: &str = "number_of_nodes";
pub const ACCELERATORS_PER_NODE: &str = "accelerators_per_node";
pub const COMM_TIME_S: &str = "comm_time_s";
