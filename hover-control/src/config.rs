// ---- User Parameters ----
// Baud rate of the link to the steering device
pub const REMOTE_BAUD: u32 = 4800;
// Set speed to 0 when no valid command was received for this long
pub const LOST_CONNECTION_STOP_MILLIS: u64 = 500;
// The slave id this board answers to on the remote bus
pub const REMOTE_SLAVE_ID: u8 = 0;
// Remote speed value that maps to the full PWM duty
pub const SPEED_FULL_SCALE: u16 = 1000;
// Change this if the wheel is going the wrong way
pub const REVERSE_DIRECTION: bool = false;
// One point battery calibration: this raw ADC reading is that many hundredths of a volt
pub const BATTERY_CALIB_ADC: u16 = 1704;
pub const BATTERY_CALIB_CENTIVOLTS: u16 = 4300;

// ---- Critical parameters. No touchy unless you know what you are doing ----
// How often the commutation tick runs
pub const CONTROL_LOOP_UPDATE_INTERVAL_US: u64 = 125;
// Resolution of the duty value inside a gate command
pub const PWM_MAX_DUTY: u16 = 1000;
// How many consecutive released samples of the shutdown input
// are needed before the emergency latch may be reset
pub const EMERGENCY_RELEASE_TICKS: u16 = 400;
// Bits on the wire per byte (start + 8 data + stop)
pub const UART_BITS_PER_BYTE: u64 = 10;
// A frame may take this many times its nominal wire time before it is dropped
pub const FRAME_TIMEOUT_FACTOR: u64 = 2;
